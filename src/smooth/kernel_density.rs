use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use rayon::prelude::*;

use super::kernel::{Bandwidth, Kernel};
use super::{Smoother, SmoothingParams};
use crate::cancel::{CancellationToken, BATCH_SIZE};
use crate::error::{Error, Result};
use crate::models::{PredictionSurface, SurfacePoint};

/// Largest output grid a single call will evaluate.
pub const MAX_GRID_POINTS: usize = 1 << 22;

/// Mixed into the seed so the bandwidth sample differs from the source sample.
const BANDWIDTH_SEED_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

/// Smooths point scores into a regular grid by kernel density estimation.
///
/// The value at each grid point is `sum_j v_j * K(|g - p_j|, h)` over the
/// (possibly subsampled) raw points. Subsampling only bounds cost; it never
/// changes which grid points are produced.
#[derive(Debug, Clone)]
pub struct KernelDensitySmoother {
    kernel: Arc<dyn Kernel>,
    bandwidth: Bandwidth,
    seed: u64,
}

impl KernelDensitySmoother {
    pub fn new(kernel: impl Kernel + 'static, bandwidth: Bandwidth, seed: u64) -> Result<Self> {
        bandwidth.validate()?;
        Ok(Self {
            kernel: Arc::new(kernel),
            bandwidth,
            seed,
        })
    }

    pub fn bandwidth(&self) -> Bandwidth {
        self.bandwidth
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Smoother for KernelDensitySmoother {
    fn name(&self) -> String {
        format!("kernel density ({})", self.kernel.name())
    }

    fn apply(
        &self,
        raw: &PredictionSurface,
        params: &SmoothingParams,
        cancel: &CancellationToken,
    ) -> Result<PredictionSurface> {
        params.validate()?;
        if raw.is_empty() {
            return raw.derive(Vec::new(), &self.name());
        }

        let grid = Grid::covering(raw.points(), params.point_spacing)?;
        let sources = subsample(raw.points(), params.training_sample_size, self.seed);
        let bandwidth_sample = subsample(
            raw.points(),
            params.prediction_sample_size,
            self.seed ^ BANDWIDTH_SEED_SALT,
        );
        let h = self.bandwidth.resolve(&bandwidth_sample, params.point_spacing);

        // Sampled sources stand in for the whole surface.
        let scale = raw.len() as f64 / sources.len() as f64;

        tracing::debug!(
            grid_points = grid.len(),
            sources = sources.len(),
            bandwidth = h,
            "Smoothing {} raw points",
            raw.len()
        );

        let mut points = Vec::with_capacity(grid.len());
        for start in (0..grid.len()).step_by(BATCH_SIZE) {
            cancel.check()?;
            let end = (start + BATCH_SIZE).min(grid.len());
            let batch: Vec<SurfacePoint> = (start..end)
                .into_par_iter()
                .map(|i| {
                    let (x, y) = grid.coordinates(i);
                    let value: f64 = sources
                        .iter()
                        .map(|s| s.value * self.kernel.weight((s.x - x).hypot(s.y - y), h))
                        .sum();
                    SurfacePoint {
                        id: i as u64,
                        x,
                        y,
                        value: value * scale,
                    }
                })
                .collect();
            points.extend(batch);
        }

        let surface = raw.derive(points, &self.name())?;
        Ok(if params.normalize {
            surface.normalized()
        } else {
            surface
        })
    }
}

/// Row-major grid over the bounding box of a point set.
#[derive(Debug, Clone, Copy)]
struct Grid {
    min_x: f64,
    min_y: f64,
    spacing: f64,
    columns: usize,
    rows: usize,
}

impl Grid {
    fn covering(points: &[SurfacePoint], spacing: f64) -> Result<Self> {
        if let Some(p) = points.iter().find(|p| !(p.x.is_finite() && p.y.is_finite())) {
            return Err(Error::invalid(
                "points",
                format!("point {} has non-finite coordinates", p.id),
            ));
        }

        let (min_x, max_x) = bounds(points.iter().map(|p| p.x));
        let (min_y, max_y) = bounds(points.iter().map(|p| p.y));
        let columns = steps(max_x - min_x, spacing) + 1.0;
        let rows = steps(max_y - min_y, spacing) + 1.0;

        if columns * rows > MAX_GRID_POINTS as f64 {
            return Err(Error::invalid(
                "point_spacing",
                format!(
                    "spacing {} yields a {}x{} grid, more than {} points",
                    spacing, columns, rows, MAX_GRID_POINTS
                ),
            ));
        }

        Ok(Self {
            min_x,
            min_y,
            spacing,
            columns: columns as usize,
            rows: rows as usize,
        })
    }

    fn len(&self) -> usize {
        self.columns * self.rows
    }

    fn coordinates(&self, index: usize) -> (f64, f64) {
        let row = index / self.columns;
        let col = index % self.columns;
        (
            self.min_x + col as f64 * self.spacing,
            self.min_y + row as f64 * self.spacing,
        )
    }
}

/// Spacing steps needed for the last grid line to reach `extent`.
fn steps(extent: f64, spacing: f64) -> f64 {
    // Absorbs rounding such as 2.1 / 0.3 = 7.000000000000001.
    (extent / spacing - 1e-9).ceil().max(0.0)
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

/// Draw at most `limit` points, keeping input order. 0 means no limit.
fn subsample(points: &[SurfacePoint], limit: usize, seed: u64) -> Vec<SurfacePoint> {
    if limit == 0 || points.len() <= limit {
        return points.to_vec();
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = index::sample(&mut rng, points.len(), limit).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| points[i]).collect()
}
