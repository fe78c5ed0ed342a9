use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::feature::Feature;
use crate::error::{Error, Result};

/// Values closer than this are treated as equal when comparing surfaces.
pub const SURFACE_EPSILON: f64 = 1e-9;

/// One value of a prediction surface.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct SurfacePoint {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

/// Where a surface came from.
///
/// `features` is a snapshot taken when the surface was produced; remapping a
/// feature later does not change it.
#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    pub model_id: Uuid,
    pub model_name: String,
    pub training_resource_id: String,
    pub prediction_resource_id: String,
    pub features: Vec<Feature>,
    /// Smoothers applied to the raw scores, in order.
    pub smoothers: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Provenance {
    /// Provenance for a surface that did not come from a model.
    pub fn unattributed(resource_id: impl Into<String>) -> Self {
        let resource_id = resource_id.into();
        Self {
            model_id: Uuid::nil(),
            model_name: String::new(),
            training_resource_id: resource_id.clone(),
            prediction_resource_id: resource_id,
            features: Vec::new(),
            smoothers: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Point-indexed prediction output, ordered by ascending point id.
///
/// Surfaces are immutable snapshots. Equality compares point ids exactly and
/// values within [`SURFACE_EPSILON`]; provenance is not compared. The tolerance
/// makes equality non-transitive, so there is no `Eq` impl.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionSurface {
    points: Vec<SurfacePoint>,
    provenance: Provenance,
}

impl PredictionSurface {
    /// Build a surface, sorting points by id. Duplicate ids are rejected.
    pub fn new(mut points: Vec<SurfacePoint>, provenance: Provenance) -> Result<Self> {
        points.sort_by_key(|p| p.id);
        if let Some(pair) = points.windows(2).find(|pair| pair[0].id == pair[1].id) {
            return Err(Error::invalid(
                "points",
                format!("point id {} appears more than once", pair[0].id),
            ));
        }
        Ok(Self { points, provenance })
    }

    pub fn empty(provenance: Provenance) -> Self {
        Self {
            points: Vec::new(),
            provenance,
        }
    }

    pub fn points(&self) -> &[SurfacePoint] {
        &self.points
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn value(&self, point_id: u64) -> Option<f64> {
        self.points
            .binary_search_by_key(&point_id, |p| p.id)
            .ok()
            .map(|i| self.points[i].value)
    }

    pub fn total(&self) -> f64 {
        self.points.iter().map(|p| p.value).sum()
    }

    /// Rescale every value so the surface sums to 1.
    ///
    /// An all-zero surface has no defined scale and stays all-zero.
    pub fn normalized(mut self) -> Self {
        let total = self.total();
        if total != 0.0 {
            for point in &mut self.points {
                point.value /= total;
            }
        }
        self
    }

    /// A new surface over `points` that records `smoother` in its provenance.
    pub(crate) fn derive(&self, points: Vec<SurfacePoint>, smoother: &str) -> Result<Self> {
        let mut provenance = self.provenance.clone();
        provenance.smoothers.push(smoother.to_string());
        provenance.created_at = Utc::now();
        Self::new(points, provenance)
    }

    pub fn approx_eq(&self, other: &Self, epsilon: f64) -> bool {
        self.points.len() == other.points.len()
            && self
                .points
                .iter()
                .zip(&other.points)
                .all(|(a, b)| a.id == b.id && (a.value - b.value).abs() <= epsilon)
    }
}

impl PartialEq for PredictionSurface {
    fn eq(&self, other: &Self) -> bool {
        self.approx_eq(other, SURFACE_EPSILON)
    }
}

/// Deterministic ordering of two surfaces.
///
/// Compares `(id, value)` pairs in point order, treating values within
/// [`SURFACE_EPSILON`] as equal, then the number of points. Returns
/// `Ordering::Equal` exactly when the surfaces are `==`.
///
/// This is not a total order: `a` and `b` can compare equal, as can `b` and
/// `c`, while `a < c`. Do not pass it to `sort_by` or use it to key ordered
/// collections; compare ids and values with `f64::total_cmp` for that.
pub fn compare(a: &PredictionSurface, b: &PredictionSurface) -> Ordering {
    for (pa, pb) in a.points.iter().zip(&b.points) {
        let cmp = pa.id.cmp(&pb.id).then_with(|| {
            if (pa.value - pb.value).abs() <= SURFACE_EPSILON {
                Ordering::Equal
            } else {
                pa.value.total_cmp(&pb.value)
            }
        });
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    a.points.len().cmp(&b.points.len())
}
