//! Round-trip and idempotence properties of `InMemoryRepository`, run as a
//! standalone integration suite the same way `memory-core`'s end-to-end
//! tests exercise the full pipeline above it.

use chrono::Utc;
use memory_core::models::{MemoryPayload, MemoryRecord, MemoryScope};
use memory_core::traits::VectorRepository;
use memory_storage::in_memory::InMemoryRepository;
use uuid::Uuid;

fn record(org: &str, agent: &str, text: &str) -> MemoryRecord {
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
        vector: Some(vec![1.0, 0.0]),
    }
}

#[tokio::test]
async fn upsert_of_the_same_id_overwrites_rather_than_duplicates() {
    let repository = InMemoryRepository::new();
    let mut original = record("org-1", "agent-1", "Call mom tomorrow");
    let id = original.id;
    repository.upsert(&[original.clone()]).await.unwrap();

    original.text = "Call mom tomorrow".to_string();
    original.payload.updated_at = Utc::now();
    repository.upsert(&[original]).await.unwrap();

    let stored = repository.list_recent("org-1", "agent-1", 10, false).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, id);
}

#[tokio::test]
async fn double_soft_delete_is_idempotent_and_keeps_advancing_updated_at() {
    let repository = InMemoryRepository::new();
    let record = record("org-1", "agent-1", "Likes oat milk lattes");
    let id = record.id;
    repository.upsert(&[record]).await.unwrap();

    repository.soft_delete(id).await.unwrap();
    let after_first = repository.get(id).await.unwrap().unwrap();
    assert!(after_first.payload.deleted);

    repository.soft_delete(id).await.unwrap();
    let after_second = repository.get(id).await.unwrap().unwrap();
    assert!(after_second.payload.deleted);
    assert!(after_second.payload.updated_at >= after_first.payload.updated_at);
}

#[tokio::test]
async fn soft_deleted_records_are_excluded_from_list_and_search_text_by_default() {
    let repository = InMemoryRepository::new();
    let live = record("org-1", "agent-1", "Prefers window seats on flights");
    let gone = record("org-1", "agent-1", "Prefers window seats too, noted twice");
    let gone_id = gone.id;
    repository.upsert(&[live, gone]).await.unwrap();
    repository.soft_delete(gone_id).await.unwrap();

    let listed = repository.list_recent("org-1", "agent-1", 10, false).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed.iter().all(|record| record.id != gone_id));

    let matches = repository
        .search_text("org-1", "agent-1", "window seats", 10, false)
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);

    let including_deleted = repository
        .list_recent("org-1", "agent-1", 10, true)
        .await
        .unwrap();
    assert_eq!(including_deleted.len(), 2);
}

#[tokio::test]
async fn delete_many_only_removes_the_requested_ids() {
    let repository = InMemoryRepository::new();
    let keep = record("org-1", "agent-1", "Keeps a standing desk");
    let drop_a = record("org-1", "agent-1", "Temporary note one");
    let drop_b = record("org-1", "agent-1", "Temporary note two");
    let keep_id = keep.id;
    let ids = vec![drop_a.id, drop_b.id];
    repository.upsert(&[keep, drop_a, drop_b]).await.unwrap();

    let removed = repository.delete_many(&ids).await.unwrap();
    assert_eq!(removed, 2);

    let remaining = repository.list_recent("org-1", "agent-1", 10, true).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, keep_id);
}
