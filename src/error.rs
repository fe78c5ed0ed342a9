//! Error types for the feature registry, model pipeline and smoothers.

use thiserror::Error;
use uuid::Uuid;

use crate::models::RemapKey;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the core.
///
/// Every failing operation leaves the registry and the store in the state they
/// had before the call.
#[derive(Debug, Error)]
pub enum Error {
    #[error("feature {key} already exists for model {model_id}")]
    DuplicateFeature { model_id: Uuid, key: RemapKey },

    #[error("feature {key} is not registered for model {model_id}")]
    FeatureNotFound { model_id: Uuid, key: RemapKey },

    #[error("feature {key} has no prediction resource mapping{}", target_suffix(.resource_id))]
    UnresolvedFeature {
        key: RemapKey,
        /// The resource the caller asked to predict against, if any.
        resource_id: Option<String>,
    },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("model {0} not found")]
    ModelNotFound(Uuid),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl Error {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

fn target_suffix(resource_id: &Option<String>) -> String {
    match resource_id {
        Some(id) => format!(" for resource {}", id),
        None => String::new(),
    }
}

/// Failures reported by a [`Store`](crate::db::Store) implementation.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    #[error("record not found: {0}")]
    NotFound(String),

    /// A write collided with an existing record's unique key.
    #[error("conflicting record: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
