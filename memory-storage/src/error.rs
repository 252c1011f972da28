//! `StorageError` — the `VectorRepository` implementations' own failure
//! taxonomy, converted into `MemoryError` at the trait boundary via `?`.

use memory_core::error::MemoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store rejected or failed an operation (network error,
    /// non-success response, collection-lifecycle failure).
    #[error("storage backend operation failed: {0}")]
    Backend(String),

    /// A stored point's payload or id couldn't be decoded into a
    /// `MemoryRecord`/`MemoryHit`, or a record couldn't be encoded for
    /// storage.
    #[error("malformed storage data: {0}")]
    Encoding(String),

    /// A requested point does not exist in the backing store.
    #[error("point not found: {0}")]
    NotFound(String),

    /// The repository itself could not be constructed or configured.
    #[error("storage configuration error: {0}")]
    Configuration(String),
}

impl From<StorageError> for MemoryError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Backend(msg) => MemoryError::Storage(msg),
            StorageError::Encoding(msg) => MemoryError::Storage(msg),
            StorageError::NotFound(msg) => MemoryError::NotFound(msg),
            StorageError::Configuration(msg) => MemoryError::Configuration(msg),
        }
    }
}
