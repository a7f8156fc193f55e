// ============================================================================
// Artifortress Library
// ============================================================================
//
// A multi-tenant artifact repository built around one invariant: the
// metadata store is the sole source of truth, the object backend holds
// immutable bytes, and every secondary surface (search, notifications) is
// rebuildable from the store.

pub mod core;
pub mod lifecycle;
pub mod object;
pub mod outbox;
pub mod policy;
pub mod publish;
pub mod reconcile;
pub mod search;
pub mod service;
pub mod store;
pub mod upload;
pub mod web;
pub mod worker;

// Re-export main types for convenience
pub use core::{ArtifactError, ArtifortressConfig, ConflictCode, Digest, RawConfig, Result};
pub use lifecycle::{GcEngine, GcParams, TombstoneService};
pub use object::{MemoryObjectStore, ObjectBackend};
pub use outbox::OutboxDispatcher;
pub use policy::{PolicyEvaluator, PolicyService, PolicyVerdict, QuarantineService};
pub use publish::{PublishEngine, PublishOutcome};
pub use reconcile::Reconciler;
pub use search::SearchWorker;
pub use service::ArtifactService;
pub use store::MetadataStore;
pub use upload::UploadSessionManager;
pub use worker::Sweeper;
