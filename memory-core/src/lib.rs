//! Tenant-scoped semantic memory orchestration.
//!
//! This crate is the dependency root of the workspace: it defines the
//! domain model, the deterministic identity and dedup-hash derivation, the
//! write-policy gate, the org/agent override cascade, the tenancy
//! boundary's output contract, and the `VectorRepository` /
//! `EmbeddingClient` / `NormalizationClient` seam traits that the storage
//! and provider crates implement. The `MemoryCore` orchestrator in
//! [`manager`] composes all of it into the add/search/update/delete
//! pipeline.
//!
//! Nothing in this crate talks to a network or a filesystem directly —
//! that's left to the concrete implementations wired in by callers.

pub mod error;
pub mod identity;
pub mod manager;
pub mod models;
pub mod overrides;
pub mod policy;
pub mod tenancy;
pub mod traits;

/// Common imports for consumers of this crate.
pub mod prelude {
    pub use crate::error::{MemoryError, Result};
    pub use crate::identity::{compute_hash, make_id};
    pub use crate::manager::MemoryCore;
    pub use crate::models::{
        DeleteMemoryRequest, MemoryAddItem, MemoryAddRequest, MemoryHit, MemoryPayload,
        MemoryRecord, MemoryScope, Message, SearchRequest, UpdateMemoryRequest,
    };
    pub use crate::overrides::{AgentOverrides, CoreConfig, OrgConfig, TenantOverrides};
    pub use crate::policy::{CollectionPolicy, RetrievalPolicy, WritePolicy, WritePolicyEngine};
    pub use crate::tenancy::{SharedSecretResolver, TenancyError, TenancyResolver, TenantContext};
    pub use crate::traits::{EmbeddingClient, NormalizationClient, RepositoryFactory, SearchFilter, VectorRepository};
}
