//! The feature registry: identity, deduplication and prediction remaps.
//!
//! Features are keyed by owning model and [`RemapKey`]. Writes to one key are
//! serialized by a per-key lock held across the store call, so storage and
//! memory never disagree. The map itself is only locked for in-memory reads
//! and updates, never while the store is working, so reads of any key proceed
//! during a slow write.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::db::Store;
use crate::error::{Error, PersistenceError, Result};
use crate::models::*;

type FeatureKey = (Uuid, RemapKey);

pub struct FeatureRegistry<S> {
    store: S,
    features: DashMap<FeatureKey, Feature>,
    write_locks: DashMap<FeatureKey, Arc<Mutex<()>>>,
}

impl<S: Store> FeatureRegistry<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            features: DashMap::new(),
            write_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register a feature for `model_id`.
    ///
    /// A second feature with the same kind and training resource for the same
    /// model is rejected with [`Error::DuplicateFeature`], whether the first
    /// one is registered here or only present in the store.
    pub fn create(&self, model_id: Uuid, input: CreateFeatureInput) -> Result<Feature> {
        let slot = (
            model_id,
            RemapKey::new(input.kind, input.training_resource_id.clone()),
        );
        let lock = self.key_lock(&slot);
        let _writer = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if self.features.contains_key(&slot) {
            return Err(Error::DuplicateFeature {
                model_id,
                key: slot.1,
            });
        }

        let record = FeatureRecord {
            model_id,
            description: input.description,
            kind: input.kind,
            training_resource_id: input.training_resource_id,
            prediction_resource_id: input.prediction_resource_id,
        };
        let id = match self.store.insert_feature(&record) {
            Ok(id) => id,
            Err(PersistenceError::Conflict(_)) => {
                return Err(Error::DuplicateFeature {
                    model_id,
                    key: slot.1,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let feature = Feature::from_parts(
            id,
            model_id,
            record.description,
            record.kind,
            record.training_resource_id,
            record.prediction_resource_id,
        );
        tracing::debug!("Registered feature {} for model {}", slot.1, model_id);
        self.features.insert(slot, feature.clone());
        Ok(feature)
    }

    /// Store a trained model together with its features, then register them.
    ///
    /// The store writes every row or none; nothing is registered unless it
    /// commits.
    pub fn create_model(
        &self,
        record: &ModelRecord,
        features: &[CreateFeatureInput],
    ) -> Result<(Uuid, Vec<Feature>)> {
        let (model_id, stored) = self.store.insert_trained_model(record, features)?;
        for feature in &stored {
            self.features
                .insert((model_id, feature.remap_key()), feature.clone());
        }
        tracing::debug!(
            "Registered {} features for new model {}",
            stored.len(),
            model_id
        );
        Ok((model_id, stored))
    }

    /// The prediction resource registered for a model's feature.
    ///
    /// Never falls back to the training resource: a feature without an
    /// explicit remap is [`Error::UnresolvedFeature`].
    pub fn resolve(&self, model_id: Uuid, key: &RemapKey) -> Result<String> {
        self.features
            .get(&(model_id, key.clone()))
            .and_then(|feature| feature.prediction_resource_id().map(str::to_string))
            .ok_or_else(|| Error::UnresolvedFeature {
                key: key.clone(),
                resource_id: None,
            })
    }

    /// Point `feature` at a new prediction resource.
    ///
    /// The store is written first; the registered feature changes only if the
    /// write succeeds. Returns the updated feature.
    pub fn set_prediction_resource(
        &self,
        feature: &Feature,
        resource_id: impl Into<String>,
    ) -> Result<Feature> {
        let resource_id = resource_id.into();
        let slot = (feature.model_id(), feature.remap_key());
        let not_found = || Error::FeatureNotFound {
            model_id: feature.model_id(),
            key: feature.remap_key(),
        };

        let lock = self.key_lock(&slot);
        let _writer = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let id = self
            .features
            .get(&slot)
            .map(|registered| registered.id())
            .ok_or_else(not_found)?;
        self.store
            .update_feature_prediction_resource(id, &resource_id)?;
        tracing::info!(
            "Remapped feature {} of model {} to {}",
            slot.1,
            slot.0,
            resource_id
        );

        let mut entry = self.features.get_mut(&slot).ok_or_else(not_found)?;
        entry.set_prediction_resource_id(resource_id);
        Ok(entry.value().clone())
    }

    pub fn get(&self, model_id: Uuid, key: &RemapKey) -> Option<Feature> {
        self.features
            .get(&(model_id, key.clone()))
            .map(|feature| feature.value().clone())
    }

    /// A model's registered features in feature order.
    pub fn features_for_model(&self, model_id: Uuid) -> Vec<Feature> {
        let mut features: Vec<Feature> = self
            .features
            .iter()
            .filter(|entry| entry.key().0 == model_id)
            .map(|entry| entry.value().clone())
            .collect();
        features.sort();
        features
    }

    /// Load a persisted model's features into the registry.
    ///
    /// Features already registered are kept as they are. Returns how many
    /// features were added.
    pub fn hydrate(&self, model_id: Uuid) -> Result<usize> {
        let stored = self.store.fetch_features_for_model(model_id)?;
        let mut added = 0;
        for feature in stored {
            if let Entry::Vacant(slot) = self.features.entry((model_id, feature.remap_key())) {
                slot.insert(feature);
                added += 1;
            }
        }
        tracing::debug!("Hydrated {} features for model {}", added, model_id);
        Ok(added)
    }

    /// Delete a model from the store, cascading to its features, and drop its
    /// registry entries. Returns whether the model existed.
    pub fn delete_model(&self, model_id: Uuid) -> Result<bool> {
        let existed = self.store.delete_model(model_id)?;
        self.features.retain(|(owner, _), _| *owner != model_id);
        self.write_locks.retain(|(owner, _), _| *owner != model_id);
        Ok(existed)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    fn key_lock(&self, slot: &FeatureKey) -> Arc<Mutex<()>> {
        Arc::clone(&self.write_locks.entry(slot.clone()).or_default())
    }
}
