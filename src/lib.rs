//! Feature registry, discrete choice models and kernel density smoothing for
//! spatial threat prediction.
//!
//! A [`dcm::DcmPipeline`] trains a [`models::DiscreteChoiceModel`] over a set
//! of [`models::SpatialPoint`]s, registering the features it discovers in a
//! [`registry::FeatureRegistry`] backed by a [`db::Store`]. Before a model can
//! predict against another resource, each feature is remapped with
//! [`registry::FeatureRegistry::set_prediction_resource`]. Predictions are
//! smoothed by the model's configured [`smooth::Smoother`]s into a
//! [`models::PredictionSurface`].

pub mod cancel;
pub mod config;
pub mod db;
pub mod dcm;
pub mod error;
pub mod models;
pub mod registry;
pub mod smooth;

pub use error::{Error, PersistenceError, Result};
