//! Seam traits implemented by the `memory-storage` and `memory-providers`
//! crates. Living here (rather than in the crates that implement them)
//! keeps `memory-core` the dependency root: storage and provider crates
//! depend on `memory-core` for these contracts, never the reverse.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{MemoryHit, MemoryPayload, MemoryRecord, MemoryScope};

/// A text embedding backend (TEI-shaped: a single `/v1/embeddings`-style
/// batch endpoint).
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embeds each input text, preserving order. Implementations are
    /// expected to retry transient failures internally and surface only
    /// exhausted-retry or malformed-response errors.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// An LLM-backed normalization backend that rewrites raw candidate text
/// into clean, atomic memory statements, optionally dropping candidates it
/// judges not worth storing.
#[async_trait]
pub trait NormalizationClient: Send + Sync {
    /// Normalizes `texts` using `model`. On any exhausted-retry failure,
    /// implementations fall back to returning the input unchanged rather
    /// than erroring, so a normalization outage degrades write quality
    /// instead of blocking writes.
    async fn normalize_memories(&self, texts: &[String], model: &str) -> Result<Vec<String>>;
}

/// Filter accepted by `VectorRepository::search` and `search_text`.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub org_id: String,
    pub agent_id: String,
    pub scope: Option<MemoryScope>,
    pub tags: Vec<String>,
}

/// Storage seam the orchestrator drives. One implementation talks to a real
/// Qdrant collection; another is an in-memory double used by this crate's
/// own tests and exported for downstream integration tests.
#[async_trait]
pub trait VectorRepository: Send + Sync {
    /// Idempotently creates the backing collection if it does not already
    /// exist, including any payload indexes the implementation needs for
    /// its filters.
    async fn ensure_collection(&self) -> Result<()>;

    async fn upsert(&self, records: &[MemoryRecord]) -> Result<()>;

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<MemoryHit>>;

    /// Like `search`, but applies a Gaussian time-decay rerank as close to
    /// the data as the implementation allows. Returns `Ok(None)` when the
    /// backend cannot express the rerank natively, signalling the caller to
    /// fall back to `search` plus its own in-memory decay.
    async fn search_with_reranker(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
        half_life_days: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<MemoryHit>>>;

    async fn get(&self, id: uuid::Uuid) -> Result<Option<MemoryRecord>>;

    async fn get_many(&self, ids: &[uuid::Uuid]) -> Result<Vec<MemoryRecord>>;

    async fn delete(&self, id: uuid::Uuid) -> Result<bool>;

    async fn delete_many(&self, ids: &[uuid::Uuid]) -> Result<usize>;

    async fn set_payload(&self, id: uuid::Uuid, payload: &MemoryPayload) -> Result<()>;

    async fn soft_delete(&self, id: uuid::Uuid) -> Result<()>;

    async fn find_by_hash(
        &self,
        hash: &str,
        org_id: &str,
        agent_id: &str,
    ) -> Result<Option<MemoryRecord>>;

    async fn list_recent(
        &self,
        org_id: &str,
        agent_id: &str,
        limit: usize,
        include_deleted: bool,
    ) -> Result<Vec<MemoryRecord>>;

    /// Substring match over stored text, paginated internally (page size
    /// 100) rather than scanning the whole collection in one round trip.
    async fn search_text(
        &self,
        org_id: &str,
        agent_id: &str,
        query: &str,
        limit: usize,
        include_deleted: bool,
    ) -> Result<Vec<MemoryRecord>>;
}

/// Page size used by `search_text` implementations that paginate via
/// scroll cursors.
pub const SEARCH_TEXT_PAGE_SIZE: usize = 100;

/// Builds (or returns a cached) `VectorRepository` for a given collection
/// name and vector size. Implemented by `memory-storage`, consumed by
/// `MemoryCore` so the orchestrator never constructs a concrete repository
/// type itself.
#[async_trait]
pub trait RepositoryFactory: Send + Sync {
    async fn repository_for(
        &self,
        collection_name: &str,
        vector_size: u32,
    ) -> Result<std::sync::Arc<dyn VectorRepository>>;
}
