//! Domain models for threat-surface.
//!
//! # Core Concepts
//!
//! - [`Feature`]: A categorical predictor discovered during training, identified by
//!   its [`FeatureKind`] and the resource it was trained against. Its prediction
//!   resource is the only field that changes after creation.
//! - [`RemapKey`]: Typed key used to find a feature's prediction-time resource.
//! - [`DiscreteChoiceModel`]: Trained coefficients plus the configuration used to
//!   smooth its predictions.
//! - [`SpatialPoint`]: An input point from the spatial point source.
//! - [`PredictionSurface`]: Point-indexed output with provenance, handed to rendering.

mod feature;
mod model;
mod point;
mod surface;

pub use feature::*;
pub use model::*;
pub use point::*;
pub use surface::*;
