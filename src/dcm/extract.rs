use std::collections::HashMap;

use crate::models::{FeatureKind, SpatialPoint};

/// Reports which categorical features are active at a point of a resource.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, point: &SpatialPoint, resource_id: &str) -> Vec<FeatureKind>;
}

impl<F> FeatureExtractor for F
where
    F: Fn(&SpatialPoint, &str) -> Vec<FeatureKind> + Send + Sync,
{
    fn extract(&self, point: &SpatialPoint, resource_id: &str) -> Vec<FeatureKind> {
        self(point, resource_id)
    }
}

/// Extractor backed by a precomputed `(resource, point) -> features` table.
///
/// Points missing from the table have no active features.
#[derive(Debug, Clone, Default)]
pub struct LookupExtractor {
    table: HashMap<(String, u64), Vec<FeatureKind>>,
}

impl LookupExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        resource_id: impl Into<String>,
        point_id: u64,
        kinds: impl IntoIterator<Item = FeatureKind>,
    ) {
        self.table
            .entry((resource_id.into(), point_id))
            .or_default()
            .extend(kinds);
    }

    pub fn with(
        mut self,
        resource_id: impl Into<String>,
        point_id: u64,
        kinds: impl IntoIterator<Item = FeatureKind>,
    ) -> Self {
        self.insert(resource_id, point_id, kinds);
        self
    }
}

impl FeatureExtractor for LookupExtractor {
    fn extract(&self, point: &SpatialPoint, resource_id: &str) -> Vec<FeatureKind> {
        self.table
            .get(&(resource_id.to_string(), point.id))
            .cloned()
            .unwrap_or_default()
    }
}
