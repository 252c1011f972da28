//! Write, retrieval, and collection policy configuration, plus the
//! stateless write-policy gate applied before a candidate memory is
//! embedded and persisted.

use serde::{Deserialize, Serialize};

use crate::models::MemoryScope;

/// Default half-life, in days, for the exponential score decay applied at
/// search time and (when the store supports it) inside the reranker
/// formula. A single knob per the override resolution recorded in
/// DESIGN.md: the original carried two separate constants for the in-memory
/// path and the reranker path; they are unified here.
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 90.0;

/// Governs which scopes may be written and how aggressively the write path
/// dedups and normalizes incoming text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WritePolicy {
    pub enabled_scopes: Vec<MemoryScope>,
    pub min_chars: usize,
    pub deduplicate: bool,
    pub normalize_with_llm: bool,
    pub max_batch: usize,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            enabled_scopes: vec![
                MemoryScope::Prefs,
                MemoryScope::Facts,
                MemoryScope::Persona,
                MemoryScope::Constraints,
            ],
            min_chars: 12,
            deduplicate: true,
            normalize_with_llm: true,
            max_batch: 32,
        }
    }
}

/// Governs the default `top_k`, search quality, and text inclusion at
/// retrieval time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalPolicy {
    pub top_k: usize,
    pub ef_search: usize,
    pub include_text: bool,
    pub half_life_days: f64,
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        Self {
            top_k: 6,
            ef_search: 64,
            include_text: true,
            half_life_days: DEFAULT_HALF_LIFE_DAYS,
        }
    }
}

/// Names and shapes the backing vector collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionPolicy {
    pub name: String,
    pub vector_size: u32,
    pub distance: String,
    pub on_disk_payload: bool,
}

impl Default for CollectionPolicy {
    fn default() -> Self {
        Self {
            name: "memories".to_string(),
            vector_size: 768,
            distance: "Cosine".to_string(),
            on_disk_payload: true,
        }
    }
}

/// Stateless gate deciding whether a normalized candidate is worth
/// embedding and persisting at all.
#[derive(Debug, Clone)]
pub struct WritePolicyEngine {
    policy: WritePolicy,
}

impl WritePolicyEngine {
    pub fn new(policy: WritePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &WritePolicy {
        &self.policy
    }

    pub fn deduplicate(&self) -> bool {
        self.policy.deduplicate
    }

    pub fn normalize_with_llm(&self) -> bool {
        self.policy.normalize_with_llm
    }

    pub fn max_batch(&self) -> usize {
        self.policy.max_batch
    }

    /// False when `text` is empty/whitespace-only, shorter than
    /// `min_chars` after trimming, or `scope` is not in `enabled_scopes`.
    pub fn should_persist(&self, text: &str, scope: MemoryScope) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.chars().count() < self.policy.min_chars {
            return false;
        }
        self.policy.enabled_scopes.contains(&scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> WritePolicyEngine {
        WritePolicyEngine::new(WritePolicy::default())
    }

    #[test]
    fn rejects_text_shorter_than_min_chars() {
        assert!(!engine().should_persist("short", MemoryScope::Facts));
    }

    #[test]
    fn rejects_blank_text() {
        assert!(!engine().should_persist("   ", MemoryScope::Facts));
    }

    #[test]
    fn rejects_disabled_scope() {
        let policy = WritePolicy {
            enabled_scopes: vec![MemoryScope::Facts],
            ..WritePolicy::default()
        };
        let engine = WritePolicyEngine::new(policy);
        assert!(!engine.should_persist("long enough text here", MemoryScope::Prefs));
    }

    #[test]
    fn accepts_long_enabled_text() {
        assert!(engine().should_persist("likes pineapple on pizza", MemoryScope::Facts));
    }

    #[test]
    fn min_chars_counts_trimmed_text_only() {
        let padded = format!("  {}  ", "x".repeat(12));
        assert!(engine().should_persist(&padded, MemoryScope::Facts));
    }
}
