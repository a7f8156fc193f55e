pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ArtifortressConfig, HttpConfig, LifecycleConfig, PolicyConfig, RawConfig, UploadConfig,
    WorkerConfig,
};
pub use error::{ArtifactError, ConflictCode, Result};
pub use types::{
    AuditId, Digest, DigestHasher, EntryId, EvaluationId, EventId, GcMode, GcRunId, JobId,
    PackageId, PolicyAction, PolicyDecision, QuarantineId, QuarantineStatus, RepoId, RepoType,
    SearchJobStatus, TenantId, TombstoneId, UploadId, UploadState, VersionId, VersionState,
};
