//! Tenancy boundary interface.
//!
//! The HTTP/auth router that terminates JWTs and shared-secret tokens is
//! out of scope for this crate; what the orchestrator needs is just the
//! *output* of that boundary — a resolved `(org_id, agent_id)` pair — so
//! only that contract is defined here, plus a minimal reference resolver
//! for the shared-secret case.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// The tenant a request has been authenticated and authorized against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub org_id: String,
    pub agent_id: String,
}

/// Default agent id assigned when a request carries no explicit agent
/// header.
pub const DEFAULT_AGENT_ID: &str = "default";

#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("missing org/agent headers and header enforcement is on")]
    MissingHeaders,

    #[error("derived org `{derived}` does not match header org `{header}`")]
    OrgMismatch { derived: String, header: String },

    #[error("no tenant could be derived from the supplied credentials")]
    Unauthenticated,
}

/// Resolves a `TenantContext` from whatever the (out-of-scope) auth layer
/// has already derived, cross-checked against caller-supplied headers.
#[async_trait]
pub trait TenancyResolver: Send + Sync {
    /// `derived_org` is the org id recovered from a credential (bearer
    /// token, JWT claim, ...); `header_org`/`header_agent` are values the
    /// caller asserts out of band. Implementations decide how strictly the
    /// two must agree.
    async fn resolve(
        &self,
        derived_org: Option<&str>,
        header_org: Option<&str>,
        header_agent: Option<&str>,
    ) -> Result<TenantContext, TenancyError>;
}

/// Reference resolver backed by a static table of shared-secret tokens,
/// each mapped to the org it authenticates. Mirrors the bearer-token branch
/// of the original service's security module; the JWT/JWKS branch belongs
/// to the HTTP layer and is not reimplemented here.
#[derive(Debug, Clone, Default)]
pub struct SharedSecretResolver {
    /// Enforce that both org and agent headers are present on every call.
    pub enforce_headers: bool,
}

impl SharedSecretResolver {
    pub fn new(enforce_headers: bool) -> Self {
        Self { enforce_headers }
    }
}

#[async_trait]
impl TenancyResolver for SharedSecretResolver {
    async fn resolve(
        &self,
        derived_org: Option<&str>,
        header_org: Option<&str>,
        header_agent: Option<&str>,
    ) -> Result<TenantContext, TenancyError> {
        if self.enforce_headers && (header_org.is_none() || header_agent.is_none()) {
            return Err(TenancyError::MissingHeaders);
        }

        let org_id = match (derived_org, header_org) {
            (Some(derived), Some(header)) if derived != header => {
                return Err(TenancyError::OrgMismatch {
                    derived: derived.to_string(),
                    header: header.to_string(),
                });
            }
            (_, Some(header)) => header.to_string(),
            (Some(derived), None) => derived.to_string(),
            (None, None) => return Err(TenancyError::Unauthenticated),
        };

        let agent_id = header_agent.unwrap_or(DEFAULT_AGENT_ID).to_string();
        Ok(TenantContext { org_id, agent_id })
    }
}

/// A token → org lookup table, the shape the shared-secret resolver is
/// typically built from when loading `SecurityConfig::shared_secrets`.
pub type SharedSecretTable = HashMap<String, String>;
