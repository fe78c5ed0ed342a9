//! Training and prediction passes of a discrete choice model.
//!
//! Training discovers features, fits coefficients and registers the features;
//! prediction scores points against a resource and runs the model's smoother
//! chain. Both are all-or-nothing: a trained model and its features reach the
//! store in a single write and the registry only after it succeeds, and a
//! failed prediction returns no surface.

mod extract;
mod fit;

pub use extract::*;
pub use fit::logistic;

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use rayon::prelude::*;
use uuid::Uuid;

use crate::cancel::{CancellationToken, BATCH_SIZE};
use crate::config::DcmConfig;
use crate::db::Store;
use crate::error::{Error, Result};
use crate::models::*;
use crate::registry::FeatureRegistry;
use crate::smooth::{self, SmootherConfig};

pub struct DcmPipeline<S> {
    registry: Arc<FeatureRegistry<S>>,
    extractors: Vec<Arc<dyn FeatureExtractor>>,
}

impl<S: Store> DcmPipeline<S> {
    pub fn new(registry: Arc<FeatureRegistry<S>>) -> Self {
        Self {
            registry,
            extractors: Vec::new(),
        }
    }

    pub fn with_extractor(mut self, extractor: impl FeatureExtractor + 'static) -> Self {
        self.extractors.push(Arc::new(extractor));
        self
    }

    pub fn registry(&self) -> &Arc<FeatureRegistry<S>> {
        &self.registry
    }

    /// Train a model on `points` drawn from `resource_id`.
    ///
    /// Every distinct feature seen at any point is registered with
    /// `resource_id` as its training resource and no prediction remap.
    pub fn train(
        &self,
        config: &DcmConfig,
        points: &[SpatialPoint],
        resource_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DiscreteChoiceModel> {
        config.validate()?;
        if points.is_empty() {
            return Err(Error::invalid("points", "training requires at least one point"));
        }
        check_points(points, resource_id)?;

        let active = par_batches(points, cancel, |point| {
            self.active_features(point, resource_id)
        })?;
        let coefficients = fit::log_odds(points, &active);
        cancel.check()?;

        let record = ModelRecord {
            training_resource_id: resource_id.to_string(),
            config: config.clone(),
            coefficients,
            created_at: Utc::now(),
        };
        let discovered: Vec<CreateFeatureInput> = record
            .coefficients
            .weights
            .iter()
            .map(|w| CreateFeatureInput::discovered(w.kind, resource_id))
            .collect();
        let (id, _) = self.registry.create_model(&record, &discovered)?;
        let model = DiscreteChoiceModel::from_parts(id, record);

        tracing::info!(
            "Trained model {} ({}) on resource {}: {} points, {} features",
            model.name(),
            id,
            resource_id,
            points.len(),
            model.coefficients().weights.len()
        );
        Ok(model)
    }

    /// Predict over `points` of `resource_id`, then apply the model's smoothers.
    ///
    /// Without smoothers, the model's `normalize` flag rescales the raw surface.
    pub fn predict(
        &self,
        model: &DiscreteChoiceModel,
        points: &[SpatialPoint],
        resource_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PredictionSurface> {
        let raw = self.predict_raw(model, points, resource_id, cancel)?;
        let config = model.config();
        let params = config.smoothing_params();

        if config.smoothers.is_empty() {
            Ok(if params.normalize {
                raw.normalized()
            } else {
                raw
            })
        } else {
            smooth::apply_chain(&config.smoothers, raw, &params, cancel)
        }
    }

    /// Per-point scores in `(0, 1)` before smoothing.
    ///
    /// Every feature of the model must be remapped to `resource_id`; otherwise
    /// the call fails with [`Error::UnresolvedFeature`] before any point is scored.
    pub fn predict_raw(
        &self,
        model: &DiscreteChoiceModel,
        points: &[SpatialPoint],
        resource_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PredictionSurface> {
        self.check_resolved(model, resource_id)?;
        check_points(points, resource_id)?;

        let coefficients = model.coefficients();
        let scored = par_batches(points, cancel, |point| {
            let active = self.active_features(point, resource_id);
            SurfacePoint {
                id: point.id,
                x: point.x,
                y: point.y,
                value: fit::logistic(coefficients.linear_predictor(&active)),
            }
        })?;

        let provenance = Provenance {
            model_id: model.id(),
            model_name: model.name().to_string(),
            training_resource_id: model.training_resource_id().to_string(),
            prediction_resource_id: resource_id.to_string(),
            features: self.registry.features_for_model(model.id()),
            smoothers: Vec::new(),
            created_at: Utc::now(),
        };

        tracing::debug!(
            "Scored {} points of resource {} with model {}",
            scored.len(),
            resource_id,
            model.id()
        );
        PredictionSurface::new(scored, provenance)
    }

    fn check_resolved(&self, model: &DiscreteChoiceModel, resource_id: &str) -> Result<()> {
        for key in model.feature_keys() {
            match self.registry.resolve(model.id(), &key) {
                Ok(resolved) if resolved == resource_id => {}
                Ok(_) | Err(Error::UnresolvedFeature { .. }) => {
                    return Err(Error::UnresolvedFeature {
                        key,
                        resource_id: Some(resource_id.to_string()),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Load a persisted model and register its features.
    pub fn load_model(&self, id: Uuid) -> Result<DiscreteChoiceModel> {
        let model = self
            .registry
            .store()
            .fetch_model(id)?
            .ok_or(Error::ModelNotFound(id))?;
        self.registry.hydrate(id)?;
        Ok(model)
    }

    /// Replace the smoother chain of a trained model, writing it through to the store.
    pub fn set_smoothers(
        &self,
        model: &mut DiscreteChoiceModel,
        smoothers: Vec<SmootherConfig>,
    ) -> Result<()> {
        for smoother in &smoothers {
            smoother.validate()?;
        }
        self.registry
            .store()
            .update_model_smoothers(model.id(), &smoothers)?;
        model.replace_smoothers(smoothers);
        Ok(())
    }

    fn active_features(&self, point: &SpatialPoint, resource_id: &str) -> BTreeSet<FeatureKind> {
        self.extractors
            .iter()
            .flat_map(|extractor| extractor.extract(point, resource_id))
            .collect()
    }
}

fn check_points(points: &[SpatialPoint], resource_id: &str) -> Result<()> {
    if let Some(point) = points.iter().find(|p| p.resource_id != resource_id) {
        return Err(Error::invalid(
            "points",
            format!(
                "point {} belongs to resource {}, not {}",
                point.id, point.resource_id, resource_id
            ),
        ));
    }

    let mut seen = HashSet::with_capacity(points.len());
    if let Some(point) = points.iter().find(|p| !seen.insert(p.id)) {
        return Err(Error::invalid(
            "points",
            format!("point id {} appears more than once", point.id),
        ));
    }
    Ok(())
}

/// Map `f` over `points` in parallel, checking for cancellation between batches.
fn par_batches<T, F>(points: &[SpatialPoint], cancel: &CancellationToken, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&SpatialPoint) -> T + Sync,
{
    let mut out = Vec::with_capacity(points.len());
    for batch in points.chunks(BATCH_SIZE) {
        cancel.check()?;
        out.par_extend(batch.par_iter().map(&f));
    }
    Ok(out)
}
