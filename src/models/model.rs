use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::feature::{FeatureKind, RemapKey};
use crate::config::DcmConfig;
use crate::smooth::SmootherConfig;

/// A trained discrete choice model.
///
/// The model references its features by [`RemapKey`]; the features themselves
/// live in the [`FeatureRegistry`](crate::registry::FeatureRegistry). After
/// training only the smoother configuration may change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscreteChoiceModel {
    id: Uuid,
    training_resource_id: String,
    config: DcmConfig,
    coefficients: Coefficients,
    created_at: DateTime<Utc>,
}

impl DiscreteChoiceModel {
    pub(crate) fn from_parts(id: Uuid, record: ModelRecord) -> Self {
        Self {
            id,
            training_resource_id: record.training_resource_id,
            config: record.config,
            coefficients: record.coefficients,
            created_at: record.created_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn training_resource_id(&self) -> &str {
        &self.training_resource_id
    }

    pub fn config(&self) -> &DcmConfig {
        &self.config
    }

    pub fn coefficients(&self) -> &Coefficients {
        &self.coefficients
    }

    pub fn smoothers(&self) -> &[SmootherConfig] {
        &self.config.smoothers
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Registry keys of the model's features, in feature order.
    pub fn feature_keys(&self) -> Vec<RemapKey> {
        self.coefficients
            .weights
            .iter()
            .map(|w| RemapKey::new(w.kind, self.training_resource_id.clone()))
            .collect()
    }

    pub(crate) fn replace_smoothers(&mut self, smoothers: Vec<SmootherConfig>) {
        self.config.smoothers = smoothers;
    }
}

/// Fitted log-odds coefficients.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Coefficients {
    pub intercept: f64,
    /// One weight per feature, sorted by feature kind.
    pub weights: Vec<FeatureWeight>,
}

impl Coefficients {
    pub fn weight(&self, kind: FeatureKind) -> Option<f64> {
        self.weights
            .binary_search_by(|w| w.kind.cmp(&kind))
            .ok()
            .map(|i| self.weights[i].coefficient)
    }

    /// Linear predictor for a point where `active` kinds are present.
    ///
    /// Kinds the model was not trained on contribute nothing.
    pub fn linear_predictor<'a>(&self, active: impl IntoIterator<Item = &'a FeatureKind>) -> f64 {
        self.intercept
            + active
                .into_iter()
                .filter_map(|kind| self.weight(*kind))
                .sum::<f64>()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeatureWeight {
    pub kind: FeatureKind,
    pub coefficient: f64,
}

/// The row handed to the store when a model is inserted.
#[derive(Debug, Clone)]
pub struct ModelRecord {
    pub training_resource_id: String,
    pub config: DcmConfig,
    pub coefficients: Coefficients,
    pub created_at: DateTime<Utc>,
}
