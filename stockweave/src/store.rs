//! Shared persistence error type for the SQLite-backed stores
//! (token usage, financial reports, vector namespaces).

use thiserror::Error;

/// Persistence error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying storage failure (SQLite, filesystem).
    #[error("storage error: {0}")]
    Storage(String),

    /// Value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Embedding failed while indexing or searching.
    #[error("embedding error: {0}")]
    Embedding(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}
