//! `ProviderError` — the HTTP-backed clients' own failure taxonomy,
//! converted into `MemoryError` at the trait boundary via `?`.

use memory_core::error::MemoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The `reqwest::Client` itself could not be built.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    /// The request could not be sent (connection refused, timed out, DNS).
    #[error("request failed: {0}")]
    Request(String),

    /// The remote service responded with a non-success status.
    #[error("service returned {status}: {body}")]
    Response { status: u16, body: String },

    /// The response body didn't decode into the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl From<ProviderError> for MemoryError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::ClientBuild(msg) => MemoryError::Configuration(msg),
            other => MemoryError::Transient(other.to_string()),
        }
    }
}
