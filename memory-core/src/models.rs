//! Domain models for the memory service: scopes, payloads, records, and the
//! request/response shapes the public `MemoryCore` API accepts and returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default time-to-live, in days, attached to a memory's metadata.
///
/// Metadata only: no background sweep expires memories once this elapses.
pub const DEFAULT_TTL_DAYS: u32 = 365;

/// Supported memory scopes, closed enumeration per the service's data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    Prefs,
    Facts,
    Persona,
    Constraints,
}

impl MemoryScope {
    /// All scopes, in declaration order.
    pub const ALL: [MemoryScope; 4] = [
        MemoryScope::Prefs,
        MemoryScope::Facts,
        MemoryScope::Persona,
        MemoryScope::Constraints,
    ];

    /// The wire string for this scope (`"prefs"`, `"facts"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryScope::Prefs => "prefs",
            MemoryScope::Facts => "facts",
            MemoryScope::Persona => "persona",
            MemoryScope::Constraints => "constraints",
        }
    }

    /// Parse a scope from its wire string, if it's one of the four supported values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "prefs" => Some(MemoryScope::Prefs),
            "facts" => Some(MemoryScope::Facts),
            "persona" => Some(MemoryScope::Persona),
            "constraints" => Some(MemoryScope::Constraints),
            _ => None,
        }
    }
}

impl Default for MemoryScope {
    fn default() -> Self {
        MemoryScope::Facts
    }
}

impl std::fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata attached to every stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryPayload {
    pub org_id: String,
    pub agent_id: String,
    pub user_id: String,
    #[serde(default)]
    pub scope: MemoryScope,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub dedupe_hash: Option<String>,
}

fn default_ttl_days() -> u32 {
    DEFAULT_TTL_DAYS
}

/// Full representation of a stored memory, including its vector when loaded
/// from or destined for the embedding/upsert path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: uuid::Uuid,
    pub text: String,
    pub payload: MemoryPayload,
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
}

/// A single nearest-neighbor result, scored after any decay rerank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub id: uuid::Uuid,
    pub score: f32,
    pub text: String,
    pub payload: MemoryPayload,
}

/// A single candidate memory item carried inside an add request (used when
/// the caller wants per-item scope/tags instead of request-level defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryAddItem {
    pub text: String,
    #[serde(default)]
    pub scope: MemoryScope,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,
}

/// A single conversational message, used by `MemoryAddRequest::iter_texts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Request accepted by `MemoryCore::add`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryAddRequest {
    pub user_id: String,
    #[serde(default)]
    pub messages: Option<Vec<Message>>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub scope: Option<MemoryScope>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,
}

impl MemoryAddRequest {
    /// Candidate texts drawn from `text` and each message's `content`, in
    /// input order. Whitespace stripping and empty filtering happens at the
    /// call site (`MemoryCore::add`), matching the original's `iter_texts`
    /// which yields raw strings.
    pub fn iter_texts(&self) -> impl Iterator<Item = &str> {
        self.text
            .as_deref()
            .into_iter()
            .chain(
                self.messages
                    .iter()
                    .flatten()
                    .map(|message| message.content.as_str()),
            )
    }
}

/// Parameters for `MemoryCore::search`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub scope: Option<MemoryScope>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Patch request accepted by `MemoryCore::update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMemoryRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub scope: Option<MemoryScope>,
    #[serde(default)]
    pub ttl_days: Option<u32>,
    #[serde(default)]
    pub deleted: Option<bool>,
}

/// Parameters for `MemoryCore::delete`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteMemoryRequest {
    #[serde(default)]
    pub hard: bool,
}
