//! Error types for the memory core

use thiserror::Error;

/// Result type alias for memory core operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors that can occur while orchestrating the memory pipeline
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Invalid configuration (bad vector size, missing credentials, dims mismatch)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Authentication failed in the (out-of-scope) tenancy boundary
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Authorization / tenancy validation failed
    #[error("authorization error: {0}")]
    Authorization(String),

    /// Requested memory does not exist, or exists under a different tenant
    #[error("memory not found: {0}")]
    NotFound(String),

    /// Reserved for a future duplicate-memory surface; not raised today because
    /// deduplication is silent (see `should_persist`/`find_by_hash`).
    #[error("duplicate memory: {0}")]
    DuplicateMemory(String),

    /// Request scope is outside the `MemoryScope` enumeration
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// Embedding, normalization, or vector-store call failed after exhausting retries
    #[error("transient external error: {0}")]
    Transient(String),

    /// Vector store returned an unexpected or malformed response
    #[error("storage error: {0}")]
    Storage(String),

    /// JSON (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<String> for MemoryError {
    fn from(s: String) -> Self {
        Self::Storage(s)
    }
}

impl From<&str> for MemoryError {
    fn from(s: &str) -> Self {
        Self::Storage(s.to_string())
    }
}
