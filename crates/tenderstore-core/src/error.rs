//! Error taxonomy for the persistence engine.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur while evolving, reading or writing the tender store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    /// Startup-only and fatal: the on-disk schema could not be brought current.
    #[error("schema migration failed at step '{step}': {source}")]
    SchemaMigration {
        step: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The stored revision differs from the one the caller loaded.
    /// Nothing was written; reload the tender and retry.
    #[error(
        "tender {tender_id} was modified by another writer \
         (loaded revision {expected:?}, stored revision {found:?})"
    )]
    Concurrency {
        tender_id: i64,
        expected: Option<String>,
        found: Option<String>,
    },

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// The full-text shadow tables are missing or malformed. Rebuild them.
    #[error("search index unavailable: {0}")]
    IndexCorruption(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
            return StoreError::IntegrityViolation(err.to_string());
        }
        StoreError::Sqlite(err)
    }
}

impl StoreError {
    /// Wrap a failure raised while applying a schema step.
    pub fn migration(step: impl Into<String>, source: rusqlite::Error) -> Self {
        StoreError::SchemaMigration {
            step: step.into(),
            source,
        }
    }

    /// Whether the caller can recover (reload and retry, or rebuild the index).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StoreError::Concurrency { .. } | StoreError::IndexCorruption(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
