#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use threat_surface::config::DcmConfig;
use threat_surface::db::{Database, Store};
use threat_surface::dcm::{DcmPipeline, LookupExtractor};
use threat_surface::models::*;
use threat_surface::registry::FeatureRegistry;
use threat_surface::smooth::SmootherConfig;
use threat_surface::PersistenceError;
use uuid::Uuid;

pub const COMMERCIAL: FeatureKind = FeatureKind::LandUse(LandUseFeature::Commercial);
pub const RESIDENTIAL: FeatureKind = FeatureKind::LandUse(LandUseFeature::Residential);
pub const ROAD_DENSITY: FeatureKind = FeatureKind::SpatialDensity(DensityFeature::Road);
pub const INCIDENT_DENSITY: FeatureKind = FeatureKind::SpatialDensity(DensityFeature::Incident);
pub const INCIDENT_DISTANCE: FeatureKind = FeatureKind::SpatialDistance(DistanceFeature::Incident);

pub fn memory_db() -> Database {
    let db = Database::open_memory().expect("Failed to create in-memory database");
    db.migrate().expect("Failed to run migrations");
    db
}

/// Config without smoothers or normalization, so predictions are raw scores.
pub fn raw_config(name: &str) -> DcmConfig {
    DcmConfig {
        name: name.to_string(),
        point_spacing: 1.0,
        training_sample_size: 0,
        prediction_sample_size: 0,
        normalize: false,
        smoothers: Vec::new(),
    }
}

pub fn smoothed_config(name: &str) -> DcmConfig {
    DcmConfig {
        smoothers: vec![SmootherConfig::default()],
        normalize: true,
        ..raw_config(name)
    }
}

/// Points on a line at `x = id` belonging to `resource_id`.
pub fn line(resource_id: &str, ids: impl IntoIterator<Item = u64>) -> Vec<SpatialPoint> {
    ids.into_iter()
        .map(|id| SpatialPoint::new(id, id as f64, 0.0, resource_id))
        .collect()
}

/// Every point of every listed resource has `kinds` active.
pub fn uniform_extractor(
    resources: &[&str],
    ids: impl IntoIterator<Item = u64> + Clone,
    kinds: &[FeatureKind],
) -> LookupExtractor {
    let mut extractor = LookupExtractor::new();
    for resource in resources {
        for id in ids.clone() {
            extractor.insert(*resource, id, kinds.iter().copied());
        }
    }
    extractor
}

pub fn pipeline<S: Store>(store: S, extractor: LookupExtractor) -> DcmPipeline<S> {
    DcmPipeline::new(Arc::new(FeatureRegistry::new(store))).with_extractor(extractor)
}

/// Holds writers at a point until released.
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Default)]
struct GateState {
    held: bool,
    waiting: usize,
}

impl Gate {
    pub fn hold(&self) {
        self.state.lock().unwrap().held = true;
    }

    pub fn release(&self) {
        self.state.lock().unwrap().held = false;
        self.changed.notify_all();
    }

    /// Block until some writer is parked at the gate.
    pub fn wait_for_writer(&self) {
        let mut state = self.state.lock().unwrap();
        while state.waiting == 0 {
            state = self.changed.wait(state).unwrap();
        }
    }

    fn pass(&self) {
        let mut state = self.state.lock().unwrap();
        state.waiting += 1;
        self.changed.notify_all();
        while state.held {
            state = self.changed.wait(state).unwrap();
        }
        state.waiting -= 1;
    }
}

/// A store that can be told to fail or stall writes.
pub struct FlakyStore {
    pub inner: Database,
    pub fail_updates: AtomicBool,
    pub fail_deletes: AtomicBool,
    /// Feature inserts that succeed before every further insert fails.
    pub feature_inserts_left: AtomicUsize,
    /// Ids of every model inserted through this store.
    pub inserted_models: Mutex<Vec<Uuid>>,
    /// Single feature inserts wait here.
    pub feature_gate: Gate,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: memory_db(),
            fail_updates: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            feature_inserts_left: AtomicUsize::new(usize::MAX),
            inserted_models: Mutex::new(Vec::new()),
            feature_gate: Gate::default(),
        }
    }

    fn take_feature_inserts(&self, n: usize) -> bool {
        self.feature_inserts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(n))
            .is_ok()
    }

    fn outage() -> PersistenceError {
        PersistenceError::Unavailable("simulated outage".to_string())
    }
}

impl Store for FlakyStore {
    fn insert_model(&self, record: &ModelRecord) -> Result<Uuid, PersistenceError> {
        let id = self.inner.insert_model(record)?;
        self.inserted_models.lock().unwrap().push(id);
        Ok(id)
    }

    /// All-or-nothing like the SQLite transaction: an exhausted insert budget
    /// fails the whole call before anything is written.
    fn insert_trained_model(
        &self,
        record: &ModelRecord,
        features: &[CreateFeatureInput],
    ) -> Result<(Uuid, Vec<Feature>), PersistenceError> {
        if !self.take_feature_inserts(features.len()) {
            return Err(Self::outage());
        }
        let (id, stored) = self.inner.insert_trained_model(record, features)?;
        self.inserted_models.lock().unwrap().push(id);
        Ok((id, stored))
    }

    fn fetch_model(&self, id: Uuid) -> Result<Option<DiscreteChoiceModel>, PersistenceError> {
        self.inner.fetch_model(id)
    }

    fn update_model_smoothers(
        &self,
        id: Uuid,
        smoothers: &[SmootherConfig],
    ) -> Result<(), PersistenceError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.update_model_smoothers(id, smoothers)
    }

    fn delete_model(&self, id: Uuid) -> Result<bool, PersistenceError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.delete_model(id)
    }

    fn insert_feature(&self, record: &FeatureRecord) -> Result<Uuid, PersistenceError> {
        self.feature_gate.pass();
        if !self.take_feature_inserts(1) {
            return Err(Self::outage());
        }
        self.inner.insert_feature(record)
    }

    fn update_feature_prediction_resource(
        &self,
        id: Uuid,
        resource_id: &str,
    ) -> Result<(), PersistenceError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.update_feature_prediction_resource(id, resource_id)
    }

    fn fetch_features_for_model(&self, model_id: Uuid) -> Result<Vec<Feature>, PersistenceError> {
        self.inner.fetch_features_for_model(model_id)
    }
}

/// Insert a bare model row so features have an owner.
pub fn stored_model<S: Store>(store: &S, resource_id: &str) -> Uuid {
    store
        .insert_model(&ModelRecord {
            training_resource_id: resource_id.to_string(),
            config: raw_config("fixture"),
            coefficients: Coefficients::default(),
            created_at: chrono::Utc::now(),
        })
        .expect("Failed to insert model")
}

pub fn feature_input(kind: FeatureKind, training: &str, prediction: Option<&str>) -> CreateFeatureInput {
    CreateFeatureInput {
        description: kind.default_description(),
        kind,
        training_resource_id: training.to_string(),
        prediction_resource_id: prediction.map(str::to_string),
    }
}
