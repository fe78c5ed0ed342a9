//! Kernel functions and bandwidth selection for density smoothing.
//!
//! Kernels are radial and normalized so that they integrate to 1 over the
//! plane for any positive bandwidth.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::SurfacePoint;

/// A radial smoothing kernel.
pub trait Kernel: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Kernel weight at `distance` from the source for bandwidth `bandwidth` (> 0).
    fn weight(&self, distance: f64, bandwidth: f64) -> f64;
}

/// The built-in kernels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    Gaussian,
    Epanechnikov,
    Uniform,
}

impl Kernel for KernelKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Gaussian => "gaussian",
            Self::Epanechnikov => "epanechnikov",
            Self::Uniform => "uniform",
        }
    }

    fn weight(&self, distance: f64, bandwidth: f64) -> f64 {
        let h2 = bandwidth * bandwidth;
        let u2 = distance * distance / h2;
        match self {
            Self::Gaussian => (-0.5 * u2).exp() / (2.0 * PI * h2),
            Self::Epanechnikov if u2 < 1.0 => 2.0 * (1.0 - u2) / (PI * h2),
            Self::Uniform if u2 <= 1.0 => 1.0 / (PI * h2),
            _ => 0.0,
        }
    }
}

/// How the kernel bandwidth is chosen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Bandwidth {
    /// A fixed bandwidth in map units.
    Fixed(f64),
    /// Silverman's rule of thumb for two dimensions: `sigma * n^(-1/6)`, where
    /// sigma is the pooled standard deviation of the sample coordinates.
    Silverman,
}

impl Bandwidth {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Fixed(h) if !(h.is_finite() && h > 0.0) => Err(Error::invalid(
                "bandwidth",
                format!("fixed bandwidth must be positive, got {}", h),
            )),
            _ => Ok(()),
        }
    }

    /// Resolve to a concrete bandwidth for `sample`.
    ///
    /// Samples too small or too concentrated to estimate a spread fall back to
    /// `point_spacing`.
    pub fn resolve(&self, sample: &[SurfacePoint], point_spacing: f64) -> f64 {
        match *self {
            Self::Fixed(h) => h,
            Self::Silverman => match silverman(sample) {
                Some(h) => h,
                None => {
                    tracing::warn!(
                        "Degenerate bandwidth sample of {} points, using point spacing {}",
                        sample.len(),
                        point_spacing
                    );
                    point_spacing
                }
            },
        }
    }
}

fn silverman(sample: &[SurfacePoint]) -> Option<f64> {
    if sample.len() < 2 {
        return None;
    }
    let n = sample.len() as f64;
    let mean_x = sample.iter().map(|p| p.x).sum::<f64>() / n;
    let mean_y = sample.iter().map(|p| p.y).sum::<f64>() / n;
    let ss: f64 = sample
        .iter()
        .map(|p| (p.x - mean_x).powi(2) + (p.y - mean_y).powi(2))
        .sum();
    // Pooled over both axes, unbiased.
    let sigma = (ss / (2.0 * (n - 1.0))).sqrt();
    let h = sigma * n.powf(-1.0 / 6.0);
    (h.is_finite() && h > 0.0).then_some(h)
}
