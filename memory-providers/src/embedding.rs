//! TEI-shaped embedding client: batches texts to a Hugging Face Text
//! Embeddings Inference `/v1/embeddings` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use memory_core::error::{MemoryError, Result};
use memory_core::traits::EmbeddingClient;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ProviderError;
use crate::retry::retry_fixed;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(400);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Async client for a TEI-compatible embedding service, with bounded
/// retries and a fixed backoff per attempt (§4.2).
pub struct TeiEmbeddingClient {
    base_url: String,
    client: Client,
}

impl TeiEmbeddingClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::ClientBuild(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn request_embeddings(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = EmbeddingRequest { input: texts };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Response { status, body });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("malformed embedding response: {e}")))?;

        Ok(parsed.data.into_iter().map(|datum| datum.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingClient for TeiEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let result = retry_fixed(MAX_ATTEMPTS, RETRY_DELAY, || self.request_embeddings(texts)).await;

        if let Err(error) = &result {
            warn!(attempts = MAX_ATTEMPTS, %error, "embedding retries exhausted");
        }
        let vectors = result?;

        if vectors.len() != texts.len() {
            return Err(MemoryError::Transient(format!(
                "embedding service returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }

        Ok(vectors)
    }
}
