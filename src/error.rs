// Error taxonomy for the registry core
//
// Storage and audit failures propagate unchanged; nothing in the core retries.

use crate::schema::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Malformed or out-of-range input. Never retried.
    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("{entity} already exists: {key}")]
    AlreadyExists { entity: &'static str, key: String },

    /// Another writer changed the row between our read and our write.
    #[error("concurrent modification of {entity} {key}: {detail}")]
    ConcurrencyConflict {
        entity: &'static str,
        key: String,
        detail: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("import failed: {0}")]
    Import(#[from] csv::Error),
}

impl RegistryError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        RegistryError::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn already_exists(entity: &'static str, key: impl Into<String>) -> Self {
        RegistryError::AlreadyExists {
            entity,
            key: key.into(),
        }
    }

    pub fn conflict(entity: &'static str, key: impl Into<String>, detail: impl Into<String>) -> Self {
        RegistryError::ConcurrencyConflict {
            entity,
            key: key.into(),
            detail: detail.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RegistryError::ConcurrencyConflict { .. })
    }
}

impl From<Vec<ValidationError>> for RegistryError {
    fn from(errors: Vec<ValidationError>) -> Self {
        RegistryError::Validation(errors)
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, RegistryError>;
