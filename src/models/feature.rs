use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The category a feature belongs to.
///
/// This is the "enum type" half of a feature's identity. Two kinds with the
/// same value text but different types are different features.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FeatureType {
    SpatialDistance,
    SpatialDensity,
    LandUse,
}

impl FeatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpatialDistance => "SpatialDistance",
            Self::SpatialDensity => "SpatialDensity",
            Self::LandUse => "LandUse",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SpatialDistance" => Some(Self::SpatialDistance),
            "SpatialDensity" => Some(Self::SpatialDensity),
            "LandUse" => Some(Self::LandUse),
            _ => None,
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distance from a point to the nearest object of a layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DistanceFeature {
    Incident,
    Road,
    Boundary,
    Facility,
}

impl DistanceFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incident => "Incident",
            Self::Road => "Road",
            Self::Boundary => "Boundary",
            Self::Facility => "Facility",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Incident" => Some(Self::Incident),
            "Road" => Some(Self::Road),
            "Boundary" => Some(Self::Boundary),
            "Facility" => Some(Self::Facility),
            _ => None,
        }
    }
}

/// Density of a layer's objects around a point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DensityFeature {
    Incident,
    Road,
    Facility,
    Population,
}

impl DensityFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incident => "Incident",
            Self::Road => "Road",
            Self::Facility => "Facility",
            Self::Population => "Population",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Incident" => Some(Self::Incident),
            "Road" => Some(Self::Road),
            "Facility" => Some(Self::Facility),
            "Population" => Some(Self::Population),
            _ => None,
        }
    }
}

/// Zoning class of the region containing a point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LandUseFeature {
    Residential,
    Commercial,
    Industrial,
    OpenSpace,
}

impl LandUseFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Residential => "Residential",
            Self::Commercial => "Commercial",
            Self::Industrial => "Industrial",
            Self::OpenSpace => "OpenSpace",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Residential" => Some(Self::Residential),
            "Commercial" => Some(Self::Commercial),
            "Industrial" => Some(Self::Industrial),
            "OpenSpace" => Some(Self::OpenSpace),
            _ => None,
        }
    }
}

/// A categorical feature: a type together with one value from that type's domain.
///
/// Kinds order by type name, then value name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "enum_type", content = "enum_value")]
pub enum FeatureKind {
    SpatialDistance(DistanceFeature),
    SpatialDensity(DensityFeature),
    LandUse(LandUseFeature),
}

impl FeatureKind {
    pub fn enum_type(&self) -> FeatureType {
        match self {
            Self::SpatialDistance(_) => FeatureType::SpatialDistance,
            Self::SpatialDensity(_) => FeatureType::SpatialDensity,
            Self::LandUse(_) => FeatureType::LandUse,
        }
    }

    pub fn enum_value(&self) -> &'static str {
        match self {
            Self::SpatialDistance(v) => v.as_str(),
            Self::SpatialDensity(v) => v.as_str(),
            Self::LandUse(v) => v.as_str(),
        }
    }

    /// Rebuild a kind from its stored type and value names.
    pub fn parse(enum_type: &str, enum_value: &str) -> Option<Self> {
        match FeatureType::from_str(enum_type)? {
            FeatureType::SpatialDistance => {
                DistanceFeature::from_str(enum_value).map(Self::SpatialDistance)
            }
            FeatureType::SpatialDensity => {
                DensityFeature::from_str(enum_value).map(Self::SpatialDensity)
            }
            FeatureType::LandUse => LandUseFeature::from_str(enum_value).map(Self::LandUse),
        }
    }

    /// Human label used when a feature is discovered during training.
    pub fn default_description(&self) -> String {
        match self {
            Self::SpatialDistance(v) => {
                format!("Distance to nearest {}", humanize(v.as_str()))
            }
            Self::SpatialDensity(v) => format!("Density of {}", humanize(v.as_str())),
            Self::LandUse(v) => format!("Land use: {}", humanize(v.as_str())),
        }
    }
}

impl Ord for FeatureKind {
    fn cmp(&self, other: &Self) -> Ordering {
        self.enum_type()
            .as_str()
            .cmp(other.enum_type().as_str())
            .then_with(|| self.enum_value().cmp(other.enum_value()))
    }
}

impl PartialOrd for FeatureKind {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.enum_type(), self.enum_value())
    }
}

/// "OpenSpace" -> "open space"
fn humanize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            out.push(' ');
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Key used to look up the prediction-time resource of a trained feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemapKey {
    pub kind: FeatureKind,
    pub training_resource_id: String,
}

impl RemapKey {
    pub fn new(kind: FeatureKind, training_resource_id: impl Into<String>) -> Self {
        Self {
            kind,
            training_resource_id: training_resource_id.into(),
        }
    }
}

impl fmt::Display for RemapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.training_resource_id)
    }
}

/// A categorical predictor tied to the resource it was trained against.
///
/// Everything except the prediction resource is fixed at creation. Equality
/// and hashing look only at the kind and both resource ids; the surrogate id,
/// owning model and description are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    id: Uuid,
    model_id: Uuid,
    description: String,
    kind: FeatureKind,
    training_resource_id: String,
    prediction_resource_id: Option<String>,
}

impl Feature {
    pub(crate) fn from_parts(
        id: Uuid,
        model_id: Uuid,
        description: String,
        kind: FeatureKind,
        training_resource_id: String,
        prediction_resource_id: Option<String>,
    ) -> Self {
        Self {
            id,
            model_id,
            description,
            kind,
            training_resource_id,
            prediction_resource_id,
        }
    }

    /// A feature that is not backed by storage. Its id and model id are nil.
    pub fn detached(
        kind: FeatureKind,
        training_resource_id: impl Into<String>,
        prediction_resource_id: Option<String>,
        description: impl Into<String>,
    ) -> Self {
        Self::from_parts(
            Uuid::nil(),
            Uuid::nil(),
            description.into(),
            kind,
            training_resource_id.into(),
            prediction_resource_id,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model_id(&self) -> Uuid {
        self.model_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> FeatureKind {
        self.kind
    }

    pub fn enum_type(&self) -> FeatureType {
        self.kind.enum_type()
    }

    pub fn enum_value(&self) -> &'static str {
        self.kind.enum_value()
    }

    pub fn training_resource_id(&self) -> &str {
        &self.training_resource_id
    }

    pub fn prediction_resource_id(&self) -> Option<&str> {
        self.prediction_resource_id.as_deref()
    }

    pub fn remap_key(&self) -> RemapKey {
        RemapKey::new(self.kind, self.training_resource_id.clone())
    }

    pub(crate) fn set_prediction_resource_id(&mut self, resource_id: String) {
        self.prediction_resource_id = Some(resource_id);
    }
}

impl PartialEq for Feature {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.training_resource_id == other.training_resource_id
            && self.prediction_resource_id == other.prediction_resource_id
    }
}

impl Eq for Feature {}

impl Hash for Feature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.training_resource_id.hash(state);
        self.prediction_resource_id.hash(state);
    }
}

impl Ord for Feature {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind
            .cmp(&other.kind)
            .then_with(|| {
                compare_resource_ids(&self.training_resource_id, &other.training_resource_id)
            })
            .then_with(|| {
                match (&self.prediction_resource_id, &other.prediction_resource_id) {
                    (Some(a), Some(b)) => compare_resource_ids(a, b),
                    (a, b) => a.is_some().cmp(&b.is_some()),
                }
            })
    }
}

impl PartialOrd for Feature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description, self.enum_type())?;
        match &self.prediction_resource_id {
            Some(prediction) if *prediction != self.training_resource_id => {
                write!(f, " --> {}", prediction)
            }
            _ => Ok(()),
        }
    }
}

/// Compare resource ids numerically when both are integers.
///
/// Integer ids sort before non-integer ids, and ids that are numerically equal
/// but spelled differently ("7" and "07") fall back to text order, so the
/// result is a total order that agrees with string equality.
pub fn compare_resource_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Input for registering a newly discovered feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFeatureInput {
    pub description: String,
    pub kind: FeatureKind,
    pub training_resource_id: String,
    /// Registers a remap immediately. `None` leaves the feature unresolved.
    pub prediction_resource_id: Option<String>,
}

impl CreateFeatureInput {
    /// Input for a feature found during training, labelled with the kind's default description.
    pub fn discovered(kind: FeatureKind, training_resource_id: impl Into<String>) -> Self {
        Self {
            description: kind.default_description(),
            kind,
            training_resource_id: training_resource_id.into(),
            prediction_resource_id: None,
        }
    }
}

/// The row handed to the store when a feature is inserted.
#[derive(Debug, Clone)]
pub struct FeatureRecord {
    pub model_id: Uuid,
    pub description: String,
    pub kind: FeatureKind,
    pub training_resource_id: String,
    pub prediction_resource_id: Option<String>,
}
