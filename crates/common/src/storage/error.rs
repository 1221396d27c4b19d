//! Storage error types

use thiserror::Error;

/// Failures surfaced by a [`KeyValueStore`](super::KeyValueStore)
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage quota exceeded: {needed} bytes needed, limit is {limit}")]
    QuotaExceeded { needed: usize, limit: usize },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

/// Storage result type
pub type StorageResult<T> = Result<T, StorageError>;
