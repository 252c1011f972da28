//! Concrete `EmbeddingClient` and `NormalizationClient` implementations:
//! a TEI-shaped embedding client and an OpenRouter-shaped chat-completions
//! normalization client, both with bounded retries over `reqwest`.

pub mod embedding;
pub mod error;
pub mod normalization;
mod retry;

pub use embedding::TeiEmbeddingClient;
pub use normalization::OpenRouterNormalizationClient;
