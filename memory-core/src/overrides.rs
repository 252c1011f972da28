//! Per-tenant policy overrides and the default → org → agent cascade that
//! resolves them against the global defaults.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::policy::{CollectionPolicy, RetrievalPolicy, WritePolicy};

/// A sparse overlay over the global defaults: every field is optional, and
/// an absent field means "inherit from whatever this overlay is applied
/// on top of."
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantOverrides {
    pub write: Option<WritePolicy>,
    pub retrieval: Option<RetrievalPolicy>,
    pub collection: Option<CollectionPolicy>,
    pub model: Option<String>,
    pub embedding_dims: Option<u32>,
}

impl TenantOverrides {
    /// Overlays `other` on top of `self`: any field `other` sets wins, any
    /// field it leaves `None` keeps `self`'s value. Used to apply an org
    /// overlay, then an agent overlay, on top of the accumulated result.
    fn merge(&self, other: &TenantOverrides) -> TenantOverrides {
        TenantOverrides {
            write: other.write.clone().or_else(|| self.write.clone()),
            retrieval: other.retrieval.clone().or_else(|| self.retrieval.clone()),
            collection: other.collection.clone().or_else(|| self.collection.clone()),
            model: other.model.clone().or_else(|| self.model.clone()),
            embedding_dims: other.embedding_dims.or(self.embedding_dims),
        }
    }
}

/// Agent-level overlay: structurally identical to `TenantOverrides`, kept
/// as a distinct type so config authors can see the cascade tier in the
/// YAML document's shape.
pub type AgentOverrides = TenantOverrides;

/// Supported embedding dimensionalities. `CoreConfig::validate` rejects any
/// other value.
pub const VALID_EMBEDDING_DIMS: [u32; 4] = [128, 256, 512, 768];

/// The global defaults plus every organisation's overlay. This is the
/// shape `memory-config::Settings::core` deserializes into; keeping it in
/// `memory-core` means the config crate can depend on `memory-core` for it
/// rather than duplicating the fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub write: WritePolicy,
    pub retrieval: RetrievalPolicy,
    pub collection: CollectionPolicy,
    pub model: String,
    pub embedding_dims: u32,
    pub organisations: HashMap<String, OrgConfig>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            write: WritePolicy::default(),
            retrieval: RetrievalPolicy::default(),
            collection: CollectionPolicy::default(),
            model: "openrouter/auto".to_string(),
            embedding_dims: 768,
            organisations: HashMap::new(),
        }
    }
}

impl CoreConfig {
    /// Rejects an `embedding_dims` outside the four supported values.
    pub fn validate(&self) -> Result<(), String> {
        if !VALID_EMBEDDING_DIMS.contains(&self.embedding_dims) {
            return Err(format!(
                "embedding_dims must be one of {VALID_EMBEDDING_DIMS:?}, got {}",
                self.embedding_dims
            ));
        }
        Ok(())
    }

    /// Resolves the effective overrides for `(org_id, agent_id)` against
    /// this config's `organisations` map.
    pub fn resolve_overrides(&self, org_id: &str, agent_id: &str) -> TenantOverrides {
        resolve_overrides(&self.organisations, org_id, agent_id)
    }
}

/// Org-level overlay, plus its nested per-agent overlays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgConfig {
    #[serde(flatten)]
    pub overrides: TenantOverrides,
    pub agents: HashMap<String, AgentOverrides>,
}

/// Resolves the effective overrides for `(org_id, agent_id)` against the
/// configured organisations map.
///
/// An org absent from the map resolves to an empty overlay (pure
/// inheritance from the global defaults). A present org contributes its
/// own fields, then the named agent's fields (if that agent is configured)
/// take precedence field-by-field over the org's.
pub fn resolve_overrides(
    organisations: &HashMap<String, OrgConfig>,
    org_id: &str,
    agent_id: &str,
) -> TenantOverrides {
    let Some(org_config) = organisations.get(org_id) else {
        return TenantOverrides::default();
    };

    let resolved = TenantOverrides::default().merge(&org_config.overrides);

    match org_config.agents.get(agent_id) {
        Some(agent_overrides) => resolved.merge(agent_overrides),
        None => resolved,
    }
}
