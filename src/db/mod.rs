//! Persistence for models and features.
//!
//! [`Store`] is the contract the core relies on; [`Database`] implements it on
//! SQLite. Every write is durable when the call returns.

mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::models::*;
use crate::smooth::SmootherConfig;

/// Storage operations the registry and model pipeline depend on.
///
/// Implementations must return ids that are immediately usable as foreign
/// references and must not retry failed writes on the caller's behalf.
pub trait Store: Send + Sync {
    fn insert_model(&self, record: &ModelRecord) -> Result<Uuid, PersistenceError>;

    /// Insert a trained model and its features as one unit: either every row
    /// is written or none is. Returns the model id and the stored features in
    /// feature order.
    fn insert_trained_model(
        &self,
        record: &ModelRecord,
        features: &[CreateFeatureInput],
    ) -> Result<(Uuid, Vec<Feature>), PersistenceError>;

    fn fetch_model(&self, id: Uuid) -> Result<Option<DiscreteChoiceModel>, PersistenceError>;

    fn update_model_smoothers(
        &self,
        id: Uuid,
        smoothers: &[SmootherConfig],
    ) -> Result<(), PersistenceError>;

    /// Delete a model and, by cascade, its features. Returns whether it existed.
    fn delete_model(&self, id: Uuid) -> Result<bool, PersistenceError>;

    /// Fails with [`PersistenceError::Conflict`] when the model already has a
    /// feature with the same natural key.
    fn insert_feature(&self, record: &FeatureRecord) -> Result<Uuid, PersistenceError>;

    fn update_feature_prediction_resource(
        &self,
        id: Uuid,
        resource_id: &str,
    ) -> Result<(), PersistenceError>;

    /// All features of a model in feature order.
    fn fetch_features_for_model(&self, model_id: Uuid) -> Result<Vec<Feature>, PersistenceError>;
}

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        schema::run_migrations(&conn)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database lock poisoned")
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

impl Store for Database {
    // ============================================================
    // Model operations
    // ============================================================

    fn insert_model(&self, record: &ModelRecord) -> Result<Uuid, PersistenceError> {
        let conn = self.lock();
        let id = Uuid::new_v4();
        insert_model_row(&conn, id, record)?;
        Ok(id)
    }

    fn insert_trained_model(
        &self,
        record: &ModelRecord,
        features: &[CreateFeatureInput],
    ) -> Result<(Uuid, Vec<Feature>), PersistenceError> {
        let mut conn = self.lock();
        // Rolled back on drop unless committed.
        let tx = conn.transaction()?;

        let model_id = Uuid::new_v4();
        insert_model_row(&tx, model_id, record)?;

        let mut stored = Vec::with_capacity(features.len());
        for input in features {
            let feature = FeatureRecord {
                model_id,
                description: input.description.clone(),
                kind: input.kind,
                training_resource_id: input.training_resource_id.clone(),
                prediction_resource_id: input.prediction_resource_id.clone(),
            };
            let id = Uuid::new_v4();
            insert_feature_row(&tx, id, &feature)?;
            stored.push(Feature::from_parts(
                id,
                model_id,
                feature.description,
                feature.kind,
                feature.training_resource_id,
                feature.prediction_resource_id,
            ));
        }

        tx.commit()?;
        stored.sort();
        Ok((model_id, stored))
    }

    fn fetch_model(&self, id: Uuid) -> Result<Option<DiscreteChoiceModel>, PersistenceError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT training_resource_id, config, coefficients, created_at
                 FROM models WHERE id = ?",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((training_resource_id, config, coefficients, created_at)) = row else {
            return Ok(None);
        };

        let record = ModelRecord {
            training_resource_id,
            config: serde_json::from_str(&config)?,
            coefficients: serde_json::from_str(&coefficients)?,
            created_at: parse_datetime(&created_at)?,
        };
        Ok(Some(DiscreteChoiceModel::from_parts(id, record)))
    }

    fn update_model_smoothers(
        &self,
        id: Uuid,
        smoothers: &[SmootherConfig],
    ) -> Result<(), PersistenceError> {
        let conn = self.lock();
        let config: Option<String> = conn
            .query_row(
                "SELECT config FROM models WHERE id = ?",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(config) = config else {
            return Err(PersistenceError::NotFound(format!("model {}", id)));
        };

        let mut config: crate::config::DcmConfig = serde_json::from_str(&config)?;
        config.smoothers = smoothers.to_vec();

        conn.execute(
            "UPDATE models SET config = ? WHERE id = ?",
            (serde_json::to_string(&config)?, id.to_string()),
        )?;
        Ok(())
    }

    fn delete_model(&self, id: Uuid) -> Result<bool, PersistenceError> {
        let conn = self.lock();
        let rows = conn.execute("DELETE FROM models WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }

    // ============================================================
    // Feature operations
    // ============================================================

    fn insert_feature(&self, record: &FeatureRecord) -> Result<Uuid, PersistenceError> {
        let conn = self.lock();
        let id = Uuid::new_v4();
        insert_feature_row(&conn, id, record)?;
        Ok(id)
    }

    fn update_feature_prediction_resource(
        &self,
        id: Uuid,
        resource_id: &str,
    ) -> Result<(), PersistenceError> {
        let conn = self.lock();
        let rows = conn.execute(
            "UPDATE features SET prediction_resource_id = ? WHERE id = ?",
            (resource_id, id.to_string()),
        )?;

        if rows == 0 {
            return Err(PersistenceError::NotFound(format!("feature {}", id)));
        }
        Ok(())
    }

    fn fetch_features_for_model(&self, model_id: Uuid) -> Result<Vec<Feature>, PersistenceError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, description, enum_type, enum_value, training_resource_id, prediction_resource_id
             FROM features WHERE model_id = ?",
        )?;

        let rows = stmt
            .query_map([model_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut features = rows
            .into_iter()
            .map(|(id, description, enum_type, enum_value, training, prediction)| {
                let kind = FeatureKind::parse(&enum_type, &enum_value).ok_or_else(|| {
                    PersistenceError::CorruptRecord(format!(
                        "feature {} has unknown kind {}:{}",
                        id, enum_type, enum_value
                    ))
                })?;
                Ok(Feature::from_parts(
                    parse_uuid(&id)?,
                    model_id,
                    description,
                    kind,
                    training,
                    prediction,
                ))
            })
            .collect::<Result<Vec<_>, PersistenceError>>()?;

        // SQL cannot order resource ids numerically.
        features.sort();
        Ok(features)
    }
}

fn insert_model_row(
    conn: &Connection,
    id: Uuid,
    record: &ModelRecord,
) -> Result<(), PersistenceError> {
    conn.execute(
        "INSERT INTO models (id, name, training_resource_id, config, coefficients, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        (
            id.to_string(),
            &record.config.name,
            &record.training_resource_id,
            serde_json::to_string(&record.config)?,
            serde_json::to_string(&record.coefficients)?,
            record.created_at.to_rfc3339(),
        ),
    )?;
    Ok(())
}

fn insert_feature_row(
    conn: &Connection,
    id: Uuid,
    record: &FeatureRecord,
) -> Result<(), PersistenceError> {
    conn.execute(
        "INSERT INTO features (id, model_id, description, enum_type, enum_value, training_resource_id, prediction_resource_id)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        (
            id.to_string(),
            record.model_id.to_string(),
            &record.description,
            record.kind.enum_type().as_str(),
            record.kind.enum_value(),
            &record.training_resource_id,
            &record.prediction_resource_id,
        ),
    )
    .map_err(|e| natural_key_conflict(e, record))?;
    Ok(())
}

fn natural_key_conflict(err: rusqlite::Error, record: &FeatureRecord) -> PersistenceError {
    match err {
        rusqlite::Error::SqliteFailure(ref failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            PersistenceError::Conflict(format!(
                "feature {}@{} of model {}",
                record.kind, record.training_resource_id, record.model_id
            ))
        }
        other => PersistenceError::Database(other),
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, PersistenceError> {
    Uuid::parse_str(s)
        .map_err(|e| PersistenceError::CorruptRecord(format!("invalid id {:?}: {}", s, e)))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PersistenceError::CorruptRecord(format!("invalid timestamp {:?}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DcmConfig;

    const COMMERCIAL: FeatureKind = FeatureKind::LandUse(LandUseFeature::Commercial);
    const ROAD: FeatureKind = FeatureKind::SpatialDensity(DensityFeature::Road);

    fn setup() -> Database {
        let db = Database::open_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn model_record() -> ModelRecord {
        ModelRecord {
            training_resource_id: "1".to_string(),
            config: DcmConfig::default(),
            coefficients: Coefficients::default(),
            created_at: Utc::now(),
        }
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.lock()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn trained_model_and_features_commit_together() {
        let db = setup();
        let inputs = vec![
            CreateFeatureInput::discovered(ROAD, "1"),
            CreateFeatureInput::discovered(COMMERCIAL, "1"),
        ];

        let (id, features) = db.insert_trained_model(&model_record(), &inputs).unwrap();

        assert!(db.fetch_model(id).unwrap().is_some());
        let kinds: Vec<FeatureKind> = features.iter().map(|f| f.kind()).collect();
        assert_eq!(kinds, vec![COMMERCIAL, ROAD]);
        assert!(features.iter().all(|f| f.model_id() == id));
        assert_eq!(db.fetch_features_for_model(id).unwrap(), features);
    }

    #[test]
    fn failed_feature_row_rolls_back_the_model() {
        let db = setup();
        let inputs = vec![
            CreateFeatureInput::discovered(COMMERCIAL, "1"),
            CreateFeatureInput::discovered(COMMERCIAL, "1"),
        ];

        let result = db.insert_trained_model(&model_record(), &inputs);

        assert!(matches!(result, Err(PersistenceError::Conflict(_))));
        assert_eq!(count(&db, "models"), 0);
        assert_eq!(count(&db, "features"), 0);
    }

    #[test]
    fn duplicate_natural_key_is_a_conflict() {
        let db = setup();
        let model_id = db.insert_model(&model_record()).unwrap();
        let record = FeatureRecord {
            model_id,
            description: "Commercial".to_string(),
            kind: COMMERCIAL,
            training_resource_id: "1".to_string(),
            prediction_resource_id: None,
        };
        db.insert_feature(&record).unwrap();

        assert!(matches!(
            db.insert_feature(&record),
            Err(PersistenceError::Conflict(_))
        ));
    }

    #[test]
    fn corrupt_feature_id_is_reported() {
        let db = setup();
        let (model_id, _) = db
            .insert_trained_model(&model_record(), &[CreateFeatureInput::discovered(ROAD, "1")])
            .unwrap();
        db.lock()
            .execute("UPDATE features SET id = 'not-a-uuid'", [])
            .unwrap();

        assert!(matches!(
            db.fetch_features_for_model(model_id),
            Err(PersistenceError::CorruptRecord(_))
        ));
    }

    #[test]
    fn corrupt_timestamp_is_reported() {
        let db = setup();
        let id = db.insert_model(&model_record()).unwrap();
        db.lock()
            .execute("UPDATE models SET created_at = 'yesterday'", [])
            .unwrap();

        assert!(matches!(
            db.fetch_model(id),
            Err(PersistenceError::CorruptRecord(_))
        ));
    }
}
