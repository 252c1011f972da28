//! The `MemoryCore` orchestrator: ties identity, write policy, override
//! resolution, the embedding/normalization clients, and a vector
//! repository factory into the `add`/`search`/`update`/`delete` pipeline.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::error::{MemoryError, Result};
use crate::identity::{compute_hash, make_id};
use crate::models::{
    DeleteMemoryRequest, MemoryHit, MemoryPayload, MemoryRecord, SearchRequest, UpdateMemoryRequest,
};
use crate::overrides::{CoreConfig, TenantOverrides};
use crate::policy::{CollectionPolicy, RetrievalPolicy, WritePolicy, WritePolicyEngine};
use crate::traits::{EmbeddingClient, NormalizationClient, RepositoryFactory, SearchFilter, VectorRepository};

/// Orchestrates the full ingest/retrieve/update/delete pipeline.
///
/// Generic over the embedding and normalization clients so `memory-core`
/// depends only on the trait objects it defines, never on a concrete
/// provider crate. The repository factory is likewise behind a trait
/// object, supplied by `memory-storage`.
pub struct MemoryCore<E, N>
where
    E: EmbeddingClient,
    N: NormalizationClient,
{
    config: CoreConfig,
    embedding_client: E,
    normalization_client: N,
    repository_factory: Arc<dyn RepositoryFactory>,
    repositories: DashMap<(String, u32), Arc<dyn VectorRepository>>,
}

impl<E, N> MemoryCore<E, N>
where
    E: EmbeddingClient,
    N: NormalizationClient,
{
    pub fn new(
        config: CoreConfig,
        embedding_client: E,
        normalization_client: N,
        repository_factory: Arc<dyn RepositoryFactory>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(MemoryError::Configuration)?;
        Ok(Self {
            config,
            embedding_client,
            normalization_client,
            repository_factory,
            repositories: DashMap::new(),
        })
    }

    /// Ensures the default collection exists. Call once at process
    /// startup; subsequent per-request repository lookups are idempotent
    /// but this gives a clear, early failure if the vector store is
    /// unreachable.
    pub async fn startup(&self) -> Result<()> {
        let repository = self
            .get_repository(&self.config.collection)
            .await?;
        repository.ensure_collection().await?;
        info!(collection = %self.config.collection.name, "memory core started up");
        Ok(())
    }

    fn resolve_overrides(&self, org_id: &str, agent_id: &str) -> TenantOverrides {
        self.config.resolve_overrides(org_id, agent_id)
    }

    fn write_policy_for<'a>(&'a self, overrides: &'a TenantOverrides) -> &'a WritePolicy {
        overrides.write.as_ref().unwrap_or(&self.config.write)
    }

    fn retrieval_policy_for<'a>(&'a self, overrides: &'a TenantOverrides) -> &'a RetrievalPolicy {
        overrides.retrieval.as_ref().unwrap_or(&self.config.retrieval)
    }

    fn collection_policy_for<'a>(&'a self, overrides: &'a TenantOverrides) -> &'a CollectionPolicy {
        overrides.collection.as_ref().unwrap_or(&self.config.collection)
    }

    fn model_for<'a>(&'a self, overrides: &'a TenantOverrides) -> &'a str {
        overrides.model.as_deref().unwrap_or(&self.config.model)
    }

    async fn get_repository(&self, collection: &CollectionPolicy) -> Result<Arc<dyn VectorRepository>> {
        let key = (collection.name.clone(), collection.vector_size);
        if let Some(repository) = self.repositories.get(&key) {
            return Ok(repository.clone());
        }
        debug!(collection = %collection.name, vector_size = collection.vector_size, "repository cache miss");
        let repository = self
            .repository_factory
            .repository_for(&collection.name, collection.vector_size)
            .await?;
        repository.ensure_collection().await?;
        self.repositories.insert(key, repository.clone());
        Ok(repository)
    }

    /// Normalizes, gates, dedups, embeds, and upserts candidate memories
    /// extracted from `request`. Returns one `MemoryRecord` per surviving
    /// candidate, in the order the candidate texts were produced — a mix
    /// of freshly-upserted and already-existing (deduplicated) records.
    pub async fn add(
        &self,
        org_id: &str,
        agent_id: &str,
        request: &crate::models::MemoryAddRequest,
    ) -> Result<Vec<MemoryRecord>> {
        let overrides = self.resolve_overrides(org_id, agent_id);
        let write_policy = self.write_policy_for(&overrides).clone();
        let engine = WritePolicyEngine::new(write_policy);
        let scope = request.scope.unwrap_or_default();

        let candidate_texts: Vec<String> = request
            .iter_texts()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .collect();

        if candidate_texts.is_empty() {
            return Ok(Vec::new());
        }

        let normalized = if engine.normalize_with_llm() {
            self.normalization_client
                .normalize_memories(&candidate_texts, self.model_for(&overrides))
                .await?
        } else {
            candidate_texts
        };

        let surviving: Vec<String> = normalized
            .into_iter()
            .filter(|text| engine.should_persist(text, scope))
            .collect();

        if surviving.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.embedding_client.embed(&surviving).await?;
        let collection = self.collection_policy_for(&overrides).clone();
        let repository = self.get_repository(&collection).await?;

        let mut all_records = Vec::with_capacity(surviving.len());
        let mut new_records = Vec::new();
        let now = Utc::now();

        for (text, vector) in surviving.into_iter().zip(vectors.into_iter()) {
            let dedupe_hash = compute_hash(org_id, agent_id, &request.user_id, &text);

            if engine.deduplicate() {
                if let Some(existing) = repository.find_by_hash(&dedupe_hash, org_id, agent_id).await? {
                    all_records.push(existing);
                    continue;
                }
            }

            let id = make_id(org_id, agent_id, &text);
            let payload = MemoryPayload {
                org_id: org_id.to_string(),
                agent_id: agent_id.to_string(),
                user_id: request.user_id.clone(),
                scope,
                tags: request.tags.clone(),
                source: request.source.clone(),
                ttl_days: request.ttl_days,
                created_at: now,
                updated_at: now,
                deleted: false,
                text: text.clone(),
                dedupe_hash: Some(dedupe_hash),
            };
            let record = MemoryRecord { id, text, payload, vector: Some(vector) };
            new_records.push(record.clone());
            all_records.push(record);
        }

        if !new_records.is_empty() {
            repository.upsert(&new_records).await?;
        }

        Ok(all_records)
    }

    /// Embeds the query, searches the tenant's collection, and applies
    /// time decay (natively via the repository's reranker when available,
    /// otherwise in-memory), returning hits sorted by descending decayed
    /// score.
    pub async fn search(
        &self,
        org_id: &str,
        agent_id: &str,
        request: &SearchRequest,
    ) -> Result<Vec<MemoryHit>> {
        let overrides = self.resolve_overrides(org_id, agent_id);
        let retrieval_policy = self.retrieval_policy_for(&overrides).clone();
        let collection = self.collection_policy_for(&overrides).clone();
        let repository = self.get_repository(&collection).await?;

        let top_k = request.k.unwrap_or(retrieval_policy.top_k);
        let vector = self
            .embedding_client
            .embed(std::slice::from_ref(&request.query))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MemoryError::Transient("embedding client returned no vectors".into()))?;

        let filter = SearchFilter {
            org_id: org_id.to_string(),
            agent_id: agent_id.to_string(),
            scope: request.scope,
            tags: request.tags.clone(),
        };

        let now = Utc::now();
        if let Some(reranked) = repository
            .search_with_reranker(&vector, top_k, &filter, retrieval_policy.half_life_days, now)
            .await?
        {
            return Ok(reranked);
        }

        warn!("vector store does not support native reranking, falling back to in-memory decay");
        let mut hits = repository.search(&vector, top_k, &filter).await?;
        for hit in &mut hits {
            hit.score = apply_time_decay(hit.score, hit.payload.created_at, now, retrieval_policy.half_life_days);
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(hits)
    }

    /// Patches a memory in place. Re-embeds and re-upserts when `text`
    /// changes; otherwise only overwrites the payload.
    pub async fn update(
        &self,
        org_id: &str,
        agent_id: &str,
        memory_id: uuid::Uuid,
        request: &UpdateMemoryRequest,
    ) -> Result<MemoryRecord> {
        let overrides = self.resolve_overrides(org_id, agent_id);
        let collection = self.collection_policy_for(&overrides).clone();
        let repository = self.get_repository(&collection).await?;

        let mut record = self.fetch_owned(&repository, org_id, agent_id, memory_id).await?;

        if let Some(tags) = &request.tags {
            record.payload.tags = tags.clone();
        }
        if let Some(scope) = request.scope {
            record.payload.scope = scope;
        }
        if let Some(ttl_days) = request.ttl_days {
            record.payload.ttl_days = ttl_days;
        }
        if let Some(deleted) = request.deleted {
            record.payload.deleted = deleted;
        }
        record.payload.updated_at = Utc::now();

        if let Some(new_text) = &request.text {
            record.text = new_text.clone();
            record.payload.text = new_text.clone();
            let vector = self
                .embedding_client
                .embed(std::slice::from_ref(new_text))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| MemoryError::Transient("embedding client returned no vectors".into()))?;
            record.vector = Some(vector);
            repository.upsert(std::slice::from_ref(&record)).await?;
        } else {
            repository.set_payload(record.id, &record.payload).await?;
        }

        Ok(record)
    }

    /// Deletes a single memory, hard (point removal) or soft (`deleted`
    /// flag), after verifying tenant ownership.
    pub async fn delete(
        &self,
        org_id: &str,
        agent_id: &str,
        memory_id: uuid::Uuid,
        request: &DeleteMemoryRequest,
    ) -> Result<()> {
        let overrides = self.resolve_overrides(org_id, agent_id);
        let collection = self.collection_policy_for(&overrides).clone();
        let repository = self.get_repository(&collection).await?;

        self.fetch_owned(&repository, org_id, agent_id, memory_id).await?;

        if request.hard {
            repository.delete(memory_id).await?;
        } else {
            repository.soft_delete(memory_id).await?;
        }
        Ok(())
    }

    /// Deletes many memories at once. Every id is tenancy-checked before
    /// being removed, including the hard-delete path — the original
    /// service skipped this check for hard deletes; this resolves that
    /// open question in favor of the stricter behavior.
    pub async fn delete_many(
        &self,
        org_id: &str,
        agent_id: &str,
        memory_ids: &[uuid::Uuid],
        request: &DeleteMemoryRequest,
    ) -> Result<usize> {
        if memory_ids.is_empty() {
            return Ok(0);
        }

        let overrides = self.resolve_overrides(org_id, agent_id);
        let collection = self.collection_policy_for(&overrides).clone();
        let repository = self.get_repository(&collection).await?;

        let owned = self.owned_ids(&repository, org_id, agent_id, memory_ids).await?;
        if owned.is_empty() {
            return Ok(0);
        }

        if request.hard {
            repository.delete_many(&owned).await
        } else {
            for id in &owned {
                repository.soft_delete(*id).await?;
            }
            Ok(owned.len())
        }
    }

    /// Fetches several memories by id, silently dropping any that do not
    /// belong to this tenant rather than erroring.
    pub async fn get_many(
        &self,
        org_id: &str,
        agent_id: &str,
        memory_ids: &[uuid::Uuid],
    ) -> Result<Vec<MemoryRecord>> {
        let overrides = self.resolve_overrides(org_id, agent_id);
        let collection = self.collection_policy_for(&overrides).clone();
        let repository = self.get_repository(&collection).await?;

        let records = repository.get_many(memory_ids).await?;
        Ok(records
            .into_iter()
            .filter(|record| record.payload.org_id == org_id && record.payload.agent_id == agent_id)
            .collect())
    }

    pub async fn list(
        &self,
        org_id: &str,
        agent_id: &str,
        limit: usize,
        include_deleted: bool,
    ) -> Result<Vec<MemoryRecord>> {
        let overrides = self.resolve_overrides(org_id, agent_id);
        let collection = self.collection_policy_for(&overrides).clone();
        let repository = self.get_repository(&collection).await?;
        repository.list_recent(org_id, agent_id, limit, include_deleted).await
    }

    pub async fn search_text(
        &self,
        org_id: &str,
        agent_id: &str,
        query: &str,
        limit: usize,
        include_deleted: bool,
    ) -> Result<Vec<MemoryRecord>> {
        let overrides = self.resolve_overrides(org_id, agent_id);
        let collection = self.collection_policy_for(&overrides).clone();
        let repository = self.get_repository(&collection).await?;
        repository.search_text(org_id, agent_id, query, limit, include_deleted).await
    }

    async fn fetch_owned(
        &self,
        repository: &Arc<dyn VectorRepository>,
        org_id: &str,
        agent_id: &str,
        memory_id: uuid::Uuid,
    ) -> Result<MemoryRecord> {
        let record = repository
            .get(memory_id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(memory_id.to_string()))?;
        if record.payload.org_id != org_id || record.payload.agent_id != agent_id {
            return Err(MemoryError::NotFound(memory_id.to_string()));
        }
        Ok(record)
    }

    async fn owned_ids(
        &self,
        repository: &Arc<dyn VectorRepository>,
        org_id: &str,
        agent_id: &str,
        memory_ids: &[uuid::Uuid],
    ) -> Result<Vec<uuid::Uuid>> {
        let records = repository.get_many(memory_ids).await?;
        Ok(records
            .into_iter()
            .filter(|record| record.payload.org_id == org_id && record.payload.agent_id == agent_id)
            .map(|record| record.id)
            .collect())
    }
}

/// Exponential score decay by age in whole days: `score * 0.5^(days /
/// half_life_days)`. Negative ages (clock skew) clamp to zero days.
pub fn apply_time_decay(
    score: f32,
    created_at: chrono::DateTime<Utc>,
    now: chrono::DateTime<Utc>,
    half_life_days: f64,
) -> f32 {
    let days = (now - created_at).num_days().max(0) as f64;
    let decay = 0.5_f64.powf(days / half_life_days);
    (score as f64 * decay) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn decay_at_zero_days_is_unchanged() {
        let now = Utc::now();
        let score = apply_time_decay(1.0, now, now, 90.0);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn decay_at_one_half_life_halves_score() {
        let now = Utc::now();
        let created = now - Duration::days(90);
        let score = apply_time_decay(1.0, created, now, 90.0);
        assert!((score - 0.5).abs() < 1e-3);
    }

    #[test]
    fn decay_clamps_future_created_at_to_zero_days() {
        let now = Utc::now();
        let created = now + Duration::days(5);
        let score = apply_time_decay(1.0, created, now, 90.0);
        assert!((score - 1.0).abs() < 1e-6);
    }
}
