use serde::{Deserialize, Serialize};

/// A point supplied by the spatial point source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpatialPoint {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    /// The resource the point was drawn from.
    pub resource_id: String,
    /// Whether an incident was observed at the point. Only training reads this.
    #[serde(default)]
    pub incident: bool,
}

impl SpatialPoint {
    pub fn new(id: u64, x: f64, y: f64, resource_id: impl Into<String>) -> Self {
        Self {
            id,
            x,
            y,
            resource_id: resource_id.into(),
            incident: false,
        }
    }

    pub fn with_incident(mut self, incident: bool) -> Self {
        self.incident = incident;
        self
    }
}
