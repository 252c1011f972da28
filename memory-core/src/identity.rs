//! Deterministic identity and dedup-hash derivation.
//!
//! Both functions are pure and deterministic: the same `(org, agent, text)`
//! (or `(org, agent, user, text)`) always produces the same output, which is
//! what lets `add` treat re-submission of the same text as an update rather
//! than a new point.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Derives a stable memory id for `(org_id, agent_id, text)`.
///
/// Two-step UUIDv5: first derive a per-tenant namespace from
/// `"memory::{org_id}::{agent_id}"`, then derive the memory id from `text`
/// within that namespace. This keeps ids unique across tenants even when two
/// tenants store byte-identical text.
pub fn make_id(org_id: &str, agent_id: &str, text: &str) -> Uuid {
    let namespace_name = format!("memory::{org_id}::{agent_id}");
    let namespace = Uuid::new_v5(&Uuid::NAMESPACE_URL, namespace_name.as_bytes());
    Uuid::new_v5(&namespace, text.as_bytes())
}

/// Computes the dedup hash for `(org_id, agent_id, user_id, text)`.
///
/// SHA-256 over the pipe-joined fields in this exact order. Two adds with
/// the same tenant/user/text collide on this hash, which `find_by_hash`
/// uses to short-circuit re-embedding and re-upserting identical memories.
pub fn compute_hash(org_id: &str, agent_id: &str, user_id: &str, text: &str) -> String {
    let joined = format!("{org_id}|{agent_id}|{user_id}|{text}");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}
