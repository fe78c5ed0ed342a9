//! Closed-form coefficient fitting.
//!
//! Each coefficient is a Laplace-smoothed log-odds of an incident given the
//! feature, relative to the base log-odds over all training points:
//!
//! - intercept `b = ln((I + 1) / (N + 1))`
//! - weight `w_f = ln((I_f + 1) / (N_f + 1)) - b`
//!
//! where `I`/`N` count incident and non-incident points, and `I_f`/`N_f`
//! count those among points where `f` is active. A point's score is the
//! logistic of `b + sum(w_f)` over its active features.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{Coefficients, FeatureKind, FeatureWeight, SpatialPoint};

pub fn log_odds(points: &[SpatialPoint], active: &[BTreeSet<FeatureKind>]) -> Coefficients {
    let incidents = points.iter().filter(|p| p.incident).count();
    let others = points.len() - incidents;
    let intercept = smoothed_log_odds(incidents, others);

    let mut counts: BTreeMap<FeatureKind, (usize, usize)> = BTreeMap::new();
    for (point, kinds) in points.iter().zip(active) {
        for kind in kinds {
            let entry = counts.entry(*kind).or_default();
            if point.incident {
                entry.0 += 1;
            } else {
                entry.1 += 1;
            }
        }
    }

    let weights = counts
        .into_iter()
        .map(|(kind, (with, without))| FeatureWeight {
            kind,
            coefficient: smoothed_log_odds(with, without) - intercept,
        })
        .collect();

    Coefficients { intercept, weights }
}

fn smoothed_log_odds(positive: usize, negative: usize) -> f64 {
    ((positive as f64 + 1.0) / (negative as f64 + 1.0)).ln()
}

pub fn logistic(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
