//! An in-memory `VectorRepository` used by this crate's own tests and
//! exported for integration tests in `memory-core`. Brute-force cosine
//! search over a `parking_lot`-guarded map, mirroring the shape of
//! `llmspell-memory`'s in-memory episodic backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memory_core::error::{MemoryError, Result};
use memory_core::models::{MemoryHit, MemoryPayload, MemoryRecord};
use memory_core::traits::{RepositoryFactory, SearchFilter, VectorRepository};
use parking_lot::RwLock;
use uuid::Uuid;

/// Gaussian/exponential time decay shared with the native-reranker
/// fallback path; kept local so the storage crate doesn't depend on
/// `memory-core::manager` for a one-line computation.
fn time_decay(score: f32, created_at: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f32 {
    let days = (now - created_at).num_days().max(0) as f64;
    (score as f64 * 0.5_f64.powf(days / half_life_days)) as f32
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Test-double vector store. Always reports reranker support, so the
/// Gaussian-decay formula path has coverage without a live Qdrant.
#[derive(Default)]
pub struct InMemoryRepository {
    points: RwLock<HashMap<Uuid, MemoryRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(payload: &MemoryPayload, filter: &SearchFilter, include_deleted: bool) -> bool {
        if payload.org_id != filter.org_id || payload.agent_id != filter.agent_id {
            return false;
        }
        if !include_deleted && payload.deleted {
            return false;
        }
        if let Some(scope) = filter.scope {
            if payload.scope != scope {
                return false;
            }
        }
        if !filter.tags.is_empty() && !filter.tags.iter().any(|tag| payload.tags.contains(tag)) {
            return false;
        }
        true
    }
}

#[async_trait]
impl VectorRepository for InMemoryRepository {
    async fn ensure_collection(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, records: &[MemoryRecord]) -> Result<()> {
        let mut points = self.points.write();
        for record in records {
            points.insert(record.id, record.clone());
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize, filter: &SearchFilter) -> Result<Vec<MemoryHit>> {
        let points = self.points.read();
        let mut hits: Vec<MemoryHit> = points
            .values()
            .filter(|record| Self::matches(&record.payload, filter, false))
            .filter_map(|record| {
                record.vector.as_ref().map(|stored| MemoryHit {
                    id: record.id,
                    score: cosine_similarity(vector, stored),
                    text: record.text.clone(),
                    payload: record.payload.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn search_with_reranker(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
        half_life_days: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<MemoryHit>>> {
        let mut hits = self.search(vector, usize::MAX, filter).await?;
        for hit in &mut hits {
            hit.score = time_decay(hit.score, hit.payload.created_at, now, half_life_days);
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(Some(hits))
    }

    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        Ok(self.points.read().get(&id).cloned())
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<MemoryRecord>> {
        let points = self.points.read();
        Ok(ids.iter().filter_map(|id| points.get(id).cloned()).collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.points.write().remove(&id).is_some())
    }

    async fn delete_many(&self, ids: &[Uuid]) -> Result<usize> {
        let mut points = self.points.write();
        Ok(ids.iter().filter(|id| points.remove(id).is_some()).count())
    }

    async fn set_payload(&self, id: Uuid, payload: &MemoryPayload) -> Result<()> {
        let mut points = self.points.write();
        let record = points
            .get_mut(&id)
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
        record.payload = payload.clone();
        record.text = payload.text.clone();
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let mut points = self.points.write();
        let record = points
            .get_mut(&id)
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
        record.payload.deleted = true;
        record.payload.updated_at = Utc::now();
        Ok(())
    }

    async fn find_by_hash(&self, hash: &str, org_id: &str, agent_id: &str) -> Result<Option<MemoryRecord>> {
        let points = self.points.read();
        Ok(points
            .values()
            .find(|record| {
                record.payload.org_id == org_id
                    && record.payload.agent_id == agent_id
                    && record.payload.dedupe_hash.as_deref() == Some(hash)
            })
            .cloned())
    }

    async fn list_recent(
        &self,
        org_id: &str,
        agent_id: &str,
        limit: usize,
        include_deleted: bool,
    ) -> Result<Vec<MemoryRecord>> {
        let points = self.points.read();
        let mut records: Vec<MemoryRecord> = points
            .values()
            .filter(|record| {
                record.payload.org_id == org_id
                    && record.payload.agent_id == agent_id
                    && (include_deleted || !record.payload.deleted)
            })
            .cloned()
            .collect();
        records.sort_by_key(|record| std::cmp::Reverse(record.payload.updated_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn search_text(
        &self,
        org_id: &str,
        agent_id: &str,
        query: &str,
        limit: usize,
        include_deleted: bool,
    ) -> Result<Vec<MemoryRecord>> {
        let needle = query.to_lowercase();
        let points = self.points.read();
        let mut matches: Vec<MemoryRecord> = points
            .values()
            .filter(|record| {
                record.payload.org_id == org_id
                    && record.payload.agent_id == agent_id
                    && (include_deleted || !record.payload.deleted)
                    && record.text.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.payload.created_at.cmp(&a.payload.created_at));
        matches.truncate(limit);
        Ok(matches)
    }
}

/// A `RepositoryFactory` handing out one shared `InMemoryRepository` per
/// collection name. Used by this crate's own tests and by `memory-core`'s
/// integration tests; never by production code.
#[derive(Default)]
pub struct InMemoryRepositoryFactory {
    repositories: RwLock<HashMap<String, Arc<dyn VectorRepository>>>,
}

impl InMemoryRepositoryFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepositoryFactory for InMemoryRepositoryFactory {
    async fn repository_for(&self, collection_name: &str, _vector_size: u32) -> Result<Arc<dyn VectorRepository>> {
        if let Some(repository) = self.repositories.read().get(collection_name) {
            return Ok(repository.clone());
        }
        let mut repositories = self.repositories.write();
        if let Some(repository) = repositories.get(collection_name) {
            return Ok(repository.clone());
        }
        let repository: Arc<dyn VectorRepository> = Arc::new(InMemoryRepository::new());
        repositories.insert(collection_name.to_string(), repository.clone());
        Ok(repository)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_core::models::MemoryScope;

    fn make_record(org: &str, agent: &str, text: &str, vector: Vec<f32>) -> MemoryRecord {
        let now = Utc::now();
        MemoryRecord {
            id: Uuid::new_v4(),
            text: text.to_string(),
            payload: MemoryPayload {
                org_id: org.to_string(),
                agent_id: agent.to_string(),
                user_id: "user-1".to_string(),
                scope: MemoryScope::Facts,
                tags: vec![],
                source: None,
                ttl_days: 365,
                created_at: now,
                updated_at: now,
                deleted: false,
                text: text.to_string(),
                dedupe_hash: None,
            },
            vector: Some(vector),
        }
    }

    #[tokio::test]
    async fn search_respects_tenant_isolation() {
        let repository = InMemoryRepository::new();
        let a = make_record("org-a", "agent-1", "text a", vec![1.0, 0.0]);
        let b = make_record("org-b", "agent-1", "text b", vec![1.0, 0.0]);
        repository.upsert(&[a, b]).await.unwrap();

        let filter = SearchFilter {
            org_id: "org-a".to_string(),
            agent_id: "agent-1".to_string(),
            scope: None,
            tags: vec![],
        };
        let hits = repository.search(&[1.0, 0.0], 10, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.org_id, "org-a");
    }

    #[tokio::test]
    async fn soft_delete_marks_deleted_without_removing_point() {
        let repository = InMemoryRepository::new();
        let record = make_record("org-a", "agent-1", "text", vec![1.0]);
        let id = record.id;
        repository.upsert(&[record]).await.unwrap();
        repository.soft_delete(id).await.unwrap();
        let fetched = repository.get(id).await.unwrap().unwrap();
        assert!(fetched.payload.deleted);
    }

    #[tokio::test]
    async fn hard_delete_removes_point() {
        let repository = InMemoryRepository::new();
        let record = make_record("org-a", "agent-1", "text", vec![1.0]);
        let id = record.id;
        repository.upsert(&[record]).await.unwrap();
        assert!(repository.delete(id).await.unwrap());
        assert!(repository.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_by_hash_scopes_to_tenant() {
        let repository = InMemoryRepository::new();
        let mut record = make_record("org-a", "agent-1", "text", vec![1.0]);
        record.payload.dedupe_hash = Some("hash-1".to_string());
        repository.upsert(&[record]).await.unwrap();

        assert!(repository
            .find_by_hash("hash-1", "org-a", "agent-1")
            .await
            .unwrap()
            .is_some());
        assert!(repository
            .find_by_hash("hash-1", "org-b", "agent-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn search_text_is_case_insensitive_substring_match() {
        let repository = InMemoryRepository::new();
        let record = make_record("org-a", "agent-1", "Likes Pineapple Pizza", vec![1.0]);
        repository.upsert(&[record]).await.unwrap();

        let hits = repository
            .search_text("org-a", "agent-1", "pineapple", 10, false)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn search_with_reranker_always_available() {
        let repository = InMemoryRepository::new();
        let record = make_record("org-a", "agent-1", "text", vec![1.0, 0.0]);
        repository.upsert(&[record]).await.unwrap();

        let filter = SearchFilter {
            org_id: "org-a".to_string(),
            agent_id: "agent-1".to_string(),
            scope: None,
            tags: vec![],
        };
        let result = repository
            .search_with_reranker(&[1.0, 0.0], 10, &filter, 90.0, Utc::now())
            .await
            .unwrap();
        assert!(result.is_some());
    }
}
