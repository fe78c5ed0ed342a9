mod common;

use common::*;
use speculate2::speculate;
use threat_surface::db::{Database, Store};
use threat_surface::models::*;
use threat_surface::smooth::{Bandwidth, KernelKind, SmootherConfig};
use threat_surface::PersistenceError;
use uuid::Uuid;

fn record(kind: FeatureKind, model_id: Uuid, training: &str, prediction: Option<&str>) -> FeatureRecord {
    FeatureRecord {
        model_id,
        description: kind.default_description(),
        kind,
        training_resource_id: training.to_string(),
        prediction_resource_id: prediction.map(str::to_string),
    }
}

speculate! {
    before {
        let db = memory_db();
    }

    describe "models" {
        describe "insert_model" {
            it "returns an id that fetch_model resolves" {
                let id = stored_model(&db, "12");

                let model = db.fetch_model(id).expect("Query failed").expect("Model missing");
                assert_eq!(model.id(), id);
                assert_eq!(model.name(), "fixture");
                assert_eq!(model.training_resource_id(), "12");
            }

            it "round trips configuration and coefficients" {
                let config = smoothed_config("Harbor");
                let coefficients = Coefficients {
                    intercept: -1.25,
                    weights: vec![FeatureWeight { kind: COMMERCIAL, coefficient: 0.5 }],
                };
                let id = db.insert_model(&ModelRecord {
                    training_resource_id: "3".to_string(),
                    config: config.clone(),
                    coefficients: coefficients.clone(),
                    created_at: chrono::Utc::now(),
                }).expect("Insert failed");

                let model = db.fetch_model(id).unwrap().unwrap();
                assert_eq!(model.config(), &config);
                assert_eq!(model.coefficients(), &coefficients);
            }
        }

        describe "fetch_model" {
            it "returns None for a non-existent model" {
                assert!(db.fetch_model(Uuid::new_v4()).expect("Query failed").is_none());
            }
        }

        describe "update_model_smoothers" {
            it "replaces the stored smoother chain" {
                let id = stored_model(&db, "1");
                let chain = vec![SmootherConfig::KernelDensity {
                    kernel: KernelKind::Epanechnikov,
                    bandwidth: Bandwidth::Fixed(40.0),
                    seed: 9,
                }];

                db.update_model_smoothers(id, &chain).expect("Update failed");

                let model = db.fetch_model(id).unwrap().unwrap();
                assert_eq!(model.smoothers(), chain.as_slice());
            }

            it "reports a missing model" {
                let result = db.update_model_smoothers(Uuid::new_v4(), &[]);
                assert!(matches!(result, Err(PersistenceError::NotFound(_))));
            }
        }

        describe "delete_model" {
            it "cascades to the model's features" {
                let id = stored_model(&db, "1");
                db.insert_feature(&record(COMMERCIAL, id, "1", None)).expect("Insert failed");

                assert!(db.delete_model(id).expect("Delete failed"));
                assert!(db.fetch_features_for_model(id).unwrap().is_empty());
                assert!(!db.delete_model(id).expect("Delete failed"));
            }
        }
    }

    describe "features" {
        describe "insert_feature" {
            it "stores every column" {
                let model_id = stored_model(&db, "1");
                let id = db.insert_feature(&record(INCIDENT_DENSITY, model_id, "1", Some("4")))
                    .expect("Insert failed");

                let features = db.fetch_features_for_model(model_id).unwrap();
                assert_eq!(features.len(), 1);
                assert_eq!(features[0].id(), id);
                assert_eq!(features[0].model_id(), model_id);
                assert_eq!(features[0].kind(), INCIDENT_DENSITY);
                assert_eq!(features[0].description(), "Density of incident");
                assert_eq!(features[0].training_resource_id(), "1");
                assert_eq!(features[0].prediction_resource_id(), Some("4"));
            }

            it "rejects a feature for a missing model" {
                let result = db.insert_feature(&record(COMMERCIAL, Uuid::new_v4(), "1", None));
                assert!(matches!(result, Err(PersistenceError::Database(_))));
            }

            it "reports a second row with the same natural key as a conflict" {
                let model_id = stored_model(&db, "1");
                db.insert_feature(&record(COMMERCIAL, model_id, "1", None)).unwrap();

                let result = db.insert_feature(&record(COMMERCIAL, model_id, "1", Some("2")));
                assert!(matches!(result, Err(PersistenceError::Conflict(_))));
                assert_eq!(db.fetch_features_for_model(model_id).unwrap().len(), 1);
            }
        }

        describe "update_feature_prediction_resource" {
            it "persists the new resource" {
                let model_id = stored_model(&db, "1");
                let id = db.insert_feature(&record(COMMERCIAL, model_id, "1", None)).unwrap();

                db.update_feature_prediction_resource(id, "2").expect("Update failed");

                let features = db.fetch_features_for_model(model_id).unwrap();
                assert_eq!(features[0].prediction_resource_id(), Some("2"));
            }

            it "reports a missing feature" {
                let result = db.update_feature_prediction_resource(Uuid::new_v4(), "2");
                assert!(matches!(result, Err(PersistenceError::NotFound(_))));
            }
        }

        describe "fetch_features_for_model" {
            it "orders resource ids numerically" {
                let model_id = stored_model(&db, "1");
                for training in ["10", "9", "100"] {
                    db.insert_feature(&record(COMMERCIAL, model_id, training, None)).unwrap();
                }

                let order: Vec<String> = db.fetch_features_for_model(model_id).unwrap()
                    .iter()
                    .map(|f| f.training_resource_id().to_string())
                    .collect();
                assert_eq!(order, vec!["9", "10", "100"]);
            }

            it "only returns the requested model's features" {
                let a = stored_model(&db, "1");
                let b = stored_model(&db, "1");
                db.insert_feature(&record(COMMERCIAL, a, "1", None)).unwrap();
                db.insert_feature(&record(RESIDENTIAL, b, "1", None)).unwrap();

                let features = db.fetch_features_for_model(a).unwrap();
                assert_eq!(features.len(), 1);
                assert_eq!(features[0].kind(), COMMERCIAL);
            }
        }
    }

    describe "file backed database" {
        it "keeps records across reopen" {
            let dir = tempfile::tempdir().expect("Failed to create temp dir");
            let path = dir.path().join("data").join("threat.db");

            let model_id = {
                let file_db = Database::open(path.clone()).expect("Failed to open");
                file_db.migrate().expect("Failed to migrate");
                let model_id = stored_model(&file_db, "1");
                file_db.insert_feature(&record(ROAD_DENSITY, model_id, "1", None)).unwrap();
                model_id
            };

            let reopened = Database::open(path).expect("Failed to reopen");
            reopened.migrate().expect("Failed to migrate");
            assert!(reopened.fetch_model(model_id).unwrap().is_some());
            assert_eq!(reopened.fetch_features_for_model(model_id).unwrap().len(), 1);
        }
    }
}
