//! Qdrant-backed `VectorRepository`: cosine-distance collection lifecycle,
//! tenant-filtered upsert/search/scroll/delete/payload-patch, and a
//! native formula-query rerank path that blends semantic score with
//! exponential recency decay inside Qdrant itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memory_core::error::Result;
use memory_core::models::{MemoryHit, MemoryPayload, MemoryRecord};
use memory_core::traits::{RepositoryFactory, SearchFilter, VectorRepository, SEARCH_TEXT_PAGE_SIZE};
use qdrant_client::qdrant::payload_index_params::IndexParams;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DecayParamsExpressionBuilder, DeleteFieldIndexCollectionBuilder, DeletePointsBuilder,
    Distance, Expression, FieldType, Filter, FormulaBuilder, GetPointsBuilder,
    KeywordIndexParamsBuilder, PointId, PointStruct, PrefetchQueryBuilder, QueryPointsBuilder,
    ScoredPoint, ScrollPointsBuilder, SetPayloadPointsBuilder, UpsertPointsBuilder, Value,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::warn;
use uuid::Uuid;

use crate::error::StorageError;

/// Plain keyword-indexed fields besides `org_id` (which additionally gets
/// the tenant-aware flag).
const KEYWORD_FIELDS: &[&str] = &["agent_id", "user_id", "scope", "tags", "dedupe_hash"];
const DATETIME_FIELDS: &[&str] = &["created_at", "updated_at"];

const RERANK_UNKNOWN: u8 = 0;
const RERANK_SUPPORTED: u8 = 1;
const RERANK_UNSUPPORTED: u8 = 2;

/// Multiplier applied to `limit` when fetching the prefetch stage of a
/// formula-reranked query, so the decay rerank has more than `limit`
/// candidates to choose from.
const RERANK_PREFETCH_FACTOR: u64 = 4;

/// Production `VectorRepository`. One instance owns one collection; the
/// reranker-support tri-state is cached on the instance so a formula-query
/// failure (unsupported Qdrant version) is only ever probed once.
pub struct QdrantRepository {
    client: Qdrant,
    collection_name: String,
    vector_size: u32,
    rerank_support: AtomicU8,
}

impl QdrantRepository {
    pub fn new(client: Qdrant, collection_name: impl Into<String>, vector_size: u32) -> Self {
        Self {
            client,
            collection_name: collection_name.into(),
            vector_size,
            rerank_support: AtomicU8::new(RERANK_UNKNOWN),
        }
    }

    fn point_id(id: Uuid) -> PointId {
        PointId::from(id.to_string())
    }

    fn parse_point_id(id: &PointId) -> Result<Uuid> {
        let result: std::result::Result<Uuid, StorageError> = match &id.point_id_options {
            Some(PointIdOptions::Uuid(s)) => {
                Uuid::parse_str(s).map_err(|e| StorageError::Encoding(format!("malformed point id {s}: {e}")))
            }
            Some(PointIdOptions::Num(n)) => {
                Err(StorageError::Encoding(format!("unexpected numeric point id {n}")))
            }
            None => Err(StorageError::Encoding("point had no id".to_string())),
        };
        Ok(result?)
    }

    fn tenancy_conditions(org_id: &str, agent_id: &str, include_deleted: bool) -> Vec<Condition> {
        let mut conditions = vec![
            Condition::matches("org_id", org_id.to_string()),
            Condition::matches("agent_id", agent_id.to_string()),
        ];
        if !include_deleted {
            conditions.push(Condition::matches("deleted", false));
        }
        conditions
    }

    fn search_filter(filter: &SearchFilter) -> Filter {
        let mut conditions = Self::tenancy_conditions(&filter.org_id, &filter.agent_id, false);
        if let Some(scope) = filter.scope {
            conditions.push(Condition::matches("scope", scope.as_str().to_string()));
        }
        if !filter.tags.is_empty() {
            conditions.push(Condition::matches("tags", filter.tags.clone()));
        }
        Filter::must(conditions)
    }

    fn payload_to_json(payload: HashMap<String, Value>) -> Result<MemoryPayload> {
        let json: serde_json::Value = Payload::from(payload).into();
        let parsed: std::result::Result<MemoryPayload, StorageError> =
            serde_json::from_value(json).map_err(|e| StorageError::Encoding(format!("malformed stored payload: {e}")));
        Ok(parsed?)
    }

    fn hit_from_scored_point(point: ScoredPoint) -> Result<MemoryHit> {
        let id = point
            .id
            .as_ref()
            .ok_or_else(|| StorageError::Encoding("scored point had no id".to_string()))?;
        let id = Self::parse_point_id(id)?;
        let payload = Self::payload_to_json(point.payload)?;
        Ok(MemoryHit {
            id,
            score: point.score,
            text: payload.text.clone(),
            payload,
        })
    }

    fn record_from_retrieved(point: qdrant_client::qdrant::RetrievedPoint) -> Result<MemoryRecord> {
        let id = point
            .id
            .as_ref()
            .ok_or_else(|| StorageError::Encoding("retrieved point had no id".to_string()))?;
        let id = Self::parse_point_id(id)?;
        let payload = Self::payload_to_json(point.payload)?;
        Ok(MemoryRecord {
            id,
            text: payload.text.clone(),
            payload,
            vector: None,
        })
    }

    /// Ensures a plain keyword/bool/datetime index exists on `field`, doing
    /// nothing if it's already present in `existing`.
    async fn ensure_plain_index(&self, existing: &[String], field: &str, field_type: FieldType) -> Result<()> {
        if existing.iter().any(|name| name == field) {
            return Ok(());
        }
        self.client
            .create_field_index(CreateFieldIndexCollectionBuilder::new(
                self.collection_name.clone(),
                field,
                field_type,
            ))
            .await
            .map_err(|e| StorageError::Backend(format!("failed to create {field} index: {e}")))?;
        Ok(())
    }

    /// Builds the formula query used by `search_with_reranker`: a nearest-
    /// vector prefetch under the tenancy/scope/tag filter, reranked by
    /// `score * 0.5^(elapsed_seconds / (half_life_days * 86400))` via
    /// Qdrant's exponential decay expression.
    fn reranked_query(
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
        half_life_days: f64,
        now: DateTime<Utc>,
    ) -> QueryPointsBuilder {
        let prefetch_limit = (limit as u64).saturating_mul(RERANK_PREFETCH_FACTOR).max(1);
        let decay = DecayParamsExpressionBuilder::new(Expression::datetime_key("created_at"))
            .target(Expression::datetime(now.to_rfc3339()))
            .scale((half_life_days * 86_400.0) as f32);
        let formula = FormulaBuilder::new(Expression::mult_with([
            Expression::score(),
            Expression::exp_decay(decay),
        ]));

        QueryPointsBuilder::new("")
            .add_prefetch(
                PrefetchQueryBuilder::default()
                    .query(vector.to_vec())
                    .filter(Self::search_filter(filter))
                    .limit(prefetch_limit),
            )
            .query(formula)
            .limit(limit as u64)
    }
}

#[async_trait]
impl VectorRepository for QdrantRepository {
    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(self.collection_name.clone())
            .await
            .map_err(|e| StorageError::Backend(format!("failed to check collection existence: {e}")))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(self.collection_name.clone())
                        .vectors_config(VectorParamsBuilder::new(self.vector_size as u64, Distance::Cosine))
                        .on_disk_payload(true),
                )
                .await
                .map_err(|e| StorageError::Backend(format!("failed to create collection: {e}")))?;
        }

        let info = self
            .client
            .collection_info(self.collection_name.clone())
            .await
            .map_err(|e| StorageError::Backend(format!("failed to fetch collection info: {e}")))?
            .result
            .ok_or_else(|| StorageError::Backend("collection info response had no result".to_string()))?;

        let existing: Vec<String> = info.payload_schema.keys().cloned().collect();

        let org_index_is_tenant_aware = info.payload_schema.get("org_id").is_some_and(|schema| {
            matches!(
                &schema.params,
                Some(params) if matches!(
                    &params.index_params,
                    Some(IndexParams::KeywordIndexParams(keyword)) if keyword.is_tenant == Some(true)
                )
            )
        });

        if existing.iter().any(|name| name == "org_id") && !org_index_is_tenant_aware {
            self.client
                .delete_field_index(DeleteFieldIndexCollectionBuilder::new(
                    self.collection_name.clone(),
                    "org_id",
                ))
                .await
                .map_err(|e| StorageError::Backend(format!("failed to drop non-tenant org_id index: {e}")))?;
        }

        if !existing.iter().any(|name| name == "org_id") || !org_index_is_tenant_aware {
            self.client
                .create_field_index(
                    CreateFieldIndexCollectionBuilder::new(self.collection_name.clone(), "org_id", FieldType::Keyword)
                        .field_index_params(KeywordIndexParamsBuilder::default().is_tenant(true).build()),
                )
                .await
                .map_err(|e| StorageError::Backend(format!("failed to create tenant-aware org_id index: {e}")))?;
        }

        for field in KEYWORD_FIELDS {
            self.ensure_plain_index(&existing, field, FieldType::Keyword).await?;
        }
        self.ensure_plain_index(&existing, "deleted", FieldType::Bool).await?;
        for field in DATETIME_FIELDS {
            self.ensure_plain_index(&existing, field, FieldType::Datetime).await?;
        }

        Ok(())
    }

    async fn upsert(&self, records: &[MemoryRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut points = Vec::with_capacity(records.len());
        for record in records {
            let vector = record
                .vector
                .clone()
                .ok_or_else(|| StorageError::Encoding(format!("record {} has no vector to upsert", record.id)))?;
            let payload_json = serde_json::to_value(&record.payload)?;
            let payload = Payload::try_from(payload_json)
                .map_err(|e| StorageError::Encoding(format!("failed to build point payload: {e}")))?;
            points.push(PointStruct::new(Self::point_id(record.id), vector, payload));
        }

        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection_name.clone(), points))
            .await
            .map_err(|e| StorageError::Backend(format!("upsert failed: {e}")))?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize, filter: &SearchFilter) -> Result<Vec<MemoryHit>> {
        let response = self
            .client
            .query(
                QueryPointsBuilder::new(self.collection_name.clone())
                    .query(vector.to_vec())
                    .filter(Self::search_filter(filter))
                    .limit(limit as u64)
                    .with_payload(true),
            )
            .await
            .map_err(|e| StorageError::Backend(format!("search failed: {e}")))?;

        response.result.into_iter().map(Self::hit_from_scored_point).collect()
    }

    async fn search_with_reranker(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
        half_life_days: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<MemoryHit>>> {
        if self.rerank_support.load(Ordering::Relaxed) == RERANK_UNSUPPORTED {
            return Ok(None);
        }

        let query = Self::reranked_query(vector, limit, filter, half_life_days, now)
            .collection_name(self.collection_name.clone())
            .with_payload(true);

        match self.client.query(query).await {
            Ok(response) => {
                self.rerank_support.store(RERANK_SUPPORTED, Ordering::Relaxed);
                let hits: Result<Vec<MemoryHit>> =
                    response.result.into_iter().map(Self::hit_from_scored_point).collect();
                hits.map(Some)
            }
            Err(error) => {
                warn!(%error, "native reranker formula query failed, falling back to in-memory decay");
                self.rerank_support.store(RERANK_UNSUPPORTED, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        let mut records = self.get_many(&[id]).await?;
        Ok(records.pop())
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<MemoryRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let point_ids: Vec<PointId> = ids.iter().map(|id| Self::point_id(*id)).collect();
        let response = self
            .client
            .get_points(GetPointsBuilder::new(self.collection_name.clone(), point_ids))
            .await
            .map_err(|e| StorageError::Backend(format!("get_points failed: {e}")))?;

        response.result.into_iter().map(Self::record_from_retrieved).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let existed = self.get(id).await?.is_some();
        if !existed {
            return Ok(false);
        }
        self.delete_many(&[id]).await?;
        Ok(true)
    }

    async fn delete_many(&self, ids: &[Uuid]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let point_ids: Vec<PointId> = ids.iter().map(|id| Self::point_id(*id)).collect();
        self.client
            .delete_points(DeletePointsBuilder::new(self.collection_name.clone()).points(point_ids))
            .await
            .map_err(|e| StorageError::Backend(format!("delete_points failed: {e}")))?;
        Ok(ids.len())
    }

    async fn set_payload(&self, id: Uuid, payload: &MemoryPayload) -> Result<()> {
        let payload_json = serde_json::to_value(payload)?;
        let payload = Payload::try_from(payload_json)
            .map_err(|e| StorageError::Encoding(format!("failed to build patch payload: {e}")))?;
        self.client
            .overwrite_payload(
                SetPayloadPointsBuilder::new(self.collection_name.clone(), payload)
                    .points_selector(vec![Self::point_id(id)]),
            )
            .await
            .map_err(|e| StorageError::Backend(format!("overwrite_payload failed: {e}")))?;
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let mut record = self
            .get(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        record.payload.deleted = true;
        record.payload.updated_at = Utc::now();
        self.set_payload(id, &record.payload).await
    }

    async fn find_by_hash(&self, hash: &str, org_id: &str, agent_id: &str) -> Result<Option<MemoryRecord>> {
        let mut conditions = Self::tenancy_conditions(org_id, agent_id, true);
        conditions.push(Condition::matches("dedupe_hash", hash.to_string()));

        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(self.collection_name.clone())
                    .filter(Filter::must(conditions))
                    .limit(1)
                    .with_payload(true),
            )
            .await
            .map_err(|e| StorageError::Backend(format!("find_by_hash scroll failed: {e}")))?;

        response
            .result
            .into_iter()
            .next()
            .map(Self::record_from_retrieved)
            .transpose()
    }

    async fn list_recent(
        &self,
        org_id: &str,
        agent_id: &str,
        limit: usize,
        include_deleted: bool,
    ) -> Result<Vec<MemoryRecord>> {
        let conditions = Self::tenancy_conditions(org_id, agent_id, include_deleted);
        let mut records = self.scroll_all(Filter::must(conditions), limit).await?;
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
        let conditions = Self::tenancy_conditions(org_id, agent_id, include_deleted);
        let filter = Filter::must(conditions);

        let mut matches = Vec::new();
        let mut offset: Option<PointId> = None;
        loop {
            let mut builder = ScrollPointsBuilder::new(self.collection_name.clone())
                .filter(filter.clone())
                .limit(SEARCH_TEXT_PAGE_SIZE as u32)
                .with_payload(true);
            if let Some(cursor) = offset.take() {
                builder = builder.offset(cursor);
            }

            let response = self
                .client
                .scroll(builder)
                .await
                .map_err(|e| StorageError::Backend(format!("search_text scroll failed: {e}")))?;

            let page_len = response.result.len();
            for point in response.result {
                let record = Self::record_from_retrieved(point)?;
                if record.text.to_lowercase().contains(&needle) {
                    matches.push(record);
                    if matches.len() >= limit {
                        return Ok(matches);
                    }
                }
            }

            match response.next_page_offset {
                Some(next) if page_len == SEARCH_TEXT_PAGE_SIZE => offset = Some(next),
                _ => break,
            }
        }
        Ok(matches)
    }
}

impl QdrantRepository {
    /// Pages through every point matching `filter` via scroll cursors,
    /// stopping once comfortably past `limit` records (a generous margin,
    /// since the caller re-sorts and truncates locally).
    async fn scroll_all(&self, filter: Filter, limit: usize) -> Result<Vec<MemoryRecord>> {
        let mut records = Vec::new();
        let mut offset: Option<PointId> = None;
        let ceiling = limit.saturating_mul(4).max(SEARCH_TEXT_PAGE_SIZE);
        loop {
            let mut builder = ScrollPointsBuilder::new(self.collection_name.clone())
                .filter(filter.clone())
                .limit(SEARCH_TEXT_PAGE_SIZE as u32)
                .with_payload(true);
            if let Some(cursor) = offset.take() {
                builder = builder.offset(cursor);
            }

            let response = self
                .client
                .scroll(builder)
                .await
                .map_err(|e| StorageError::Backend(format!("scroll failed: {e}")))?;

            let page_len = response.result.len();
            for point in response.result {
                records.push(Self::record_from_retrieved(point)?);
            }
            if records.len() >= ceiling {
                break;
            }

            match response.next_page_offset {
                Some(next) if page_len == SEARCH_TEXT_PAGE_SIZE => offset = Some(next),
                _ => break,
            }
        }
        Ok(records)
    }
}

/// Builds (and caches) one `QdrantRepository` per collection name, sharing
/// a single gRPC connection across all of them.
pub struct QdrantRepositoryFactory {
    client: Qdrant,
    repositories: parking_lot::RwLock<HashMap<String, Arc<dyn VectorRepository>>>,
}

impl QdrantRepositoryFactory {
    pub fn new(url: impl AsRef<str>, api_key: Option<String>) -> Result<Self> {
        let mut builder = Qdrant::from_url(url.as_ref());
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder
            .build()
            .map_err(|e| StorageError::Configuration(format!("failed to build Qdrant client: {e}")))?;
        Ok(Self {
            client,
            repositories: parking_lot::RwLock::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl RepositoryFactory for QdrantRepositoryFactory {
    async fn repository_for(&self, collection_name: &str, vector_size: u32) -> Result<Arc<dyn VectorRepository>> {
        if let Some(repository) = self.repositories.read().get(collection_name) {
            return Ok(repository.clone());
        }

        let repository: Arc<dyn VectorRepository> = Arc::new(QdrantRepository::new(
            self.client.clone(),
            collection_name.to_string(),
            vector_size,
        ));
        repository.ensure_collection().await?;

        let mut repositories = self.repositories.write();
        if let Some(existing) = repositories.get(collection_name) {
            return Ok(existing.clone());
        }
        repositories.insert(collection_name.to_string(), repository.clone());
        Ok(repository)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_core::models::MemoryScope;

    #[test]
    fn search_filter_includes_tenancy_and_optional_scope() {
        let filter = SearchFilter {
            org_id: "org-a".to_string(),
            agent_id: "agent-1".to_string(),
            scope: Some(MemoryScope::Facts),
            tags: vec!["work".to_string()],
        };
        let built = QdrantRepository::search_filter(&filter);
        assert_eq!(built.must.len(), 5);
    }

    #[test]
    fn point_id_round_trips_through_string() {
        let id = Uuid::new_v4();
        let point_id = QdrantRepository::point_id(id);
        let parsed = QdrantRepository::parse_point_id(&point_id).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn tenancy_conditions_omit_deleted_clause_when_included() {
        let with_deleted = QdrantRepository::tenancy_conditions("org", "agent", true);
        let without_deleted = QdrantRepository::tenancy_conditions("org", "agent", false);
        assert_eq!(with_deleted.len(), 2);
        assert_eq!(without_deleted.len(), 3);
    }
}
