//! Post-processing of raw prediction surfaces.
//!
//! A smoother is configured once (construction) and may then be applied any
//! number of times; it keeps no state between calls.

mod kernel;
mod kernel_density;

pub use kernel::*;
pub use kernel_density::*;

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::models::PredictionSurface;

/// Per-call smoothing parameters, usually taken from the model's
/// [`DcmConfig`](crate::config::DcmConfig).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingParams {
    pub point_spacing: f64,
    /// Caps the number of kernel source points. 0 means no cap.
    pub training_sample_size: usize,
    /// Caps the number of points used to choose the bandwidth. 0 means no cap.
    pub prediction_sample_size: usize,
    pub normalize: bool,
}

impl SmoothingParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.point_spacing.is_finite() && self.point_spacing > 0.0) {
            return Err(Error::invalid(
                "point_spacing",
                format!("must be a positive number, got {}", self.point_spacing),
            ));
        }
        Ok(())
    }
}

pub trait Smoother: Send + Sync {
    /// Label recorded in surface provenance.
    fn name(&self) -> String;

    /// Smooth `raw` into a new surface.
    ///
    /// Fails without producing a surface on invalid parameters or cancellation.
    fn apply(
        &self,
        raw: &PredictionSurface,
        params: &SmoothingParams,
        cancel: &CancellationToken,
    ) -> Result<PredictionSurface>;
}

/// Serializable smoother configuration stored with a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SmootherConfig {
    KernelDensity {
        kernel: KernelKind,
        bandwidth: Bandwidth,
        /// Seed for subsampling; equal seeds give identical output.
        #[serde(default)]
        seed: u64,
    },
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self::KernelDensity {
            kernel: KernelKind::Gaussian,
            bandwidth: Bandwidth::Silverman,
            seed: 0,
        }
    }
}

impl SmootherConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::KernelDensity { bandwidth, .. } => bandwidth.validate(),
        }
    }

    pub fn build(&self) -> Result<Box<dyn Smoother>> {
        match *self {
            Self::KernelDensity {
                kernel,
                bandwidth,
                seed,
            } => Ok(Box::new(KernelDensitySmoother::new(kernel, bandwidth, seed)?)),
        }
    }
}

/// Apply `configs` in order, feeding each output into the next smoother.
pub fn apply_chain(
    configs: &[SmootherConfig],
    raw: PredictionSurface,
    params: &SmoothingParams,
    cancel: &CancellationToken,
) -> Result<PredictionSurface> {
    params.validate()?;
    let smoothers = configs
        .iter()
        .map(SmootherConfig::build)
        .collect::<Result<Vec<_>>>()?;

    smoothers
        .iter()
        .try_fold(raw, |surface, smoother| smoother.apply(&surface, params, cancel))
}
