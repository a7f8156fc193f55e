//! Row shapes for every authoritative table.
//!
//! These are plain owned structs: one per table, named fields bound to the
//! columns the schema defines. Readers clone rows out of the store; writers
//! go through the mutators on [`super::state::StoreState`].

use crate::core::types::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as Json;

#[derive(Debug, Clone, Serialize)]
pub struct TenantRow {
    pub tenant_id: TenantId,
    pub slug: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepositoryRow {
    pub repo_id: RepoId,
    pub tenant_id: TenantId,
    pub repo_key: String,
    pub repo_type: RepoType,
    pub config: Json,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageRow {
    pub package_id: PackageId,
    pub tenant_id: TenantId,
    pub repo_id: RepoId,
    pub package_type: String,
    pub namespace: Option<String>,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl PackageRow {
    /// Uniqueness key component: nulls collapse deterministically.
    pub fn namespace_key(&self) -> String {
        self.namespace.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageVersionRow {
    pub version_id: VersionId,
    pub tenant_id: TenantId,
    pub repo_id: RepoId,
    pub package_id: PackageId,
    pub version: String,
    pub state: VersionState,
    pub published_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub tombstoned_at: Option<DateTime<Utc>>,
    pub tombstone_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlobRow {
    pub digest: Digest,
    pub length_bytes: u64,
    pub storage_key: String,
    pub object_etag: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadSessionRow {
    pub upload_id: UploadId,
    pub tenant_id: TenantId,
    pub repo_id: RepoId,
    pub expected_digest: Digest,
    pub expected_length: u64,
    pub state: UploadState,
    pub object_staging_key: Option<String>,
    pub storage_upload_id: Option<String>,
    pub committed_blob_digest: Option<Digest>,
    pub deduped: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub aborted_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactEntryRow {
    pub entry_id: EntryId,
    pub version_id: VersionId,
    pub relative_path: String,
    pub blob_digest: Digest,
    pub checksum_sha1: Option<String>,
    pub checksum_sha256: Option<String>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestRow {
    pub version_id: VersionId,
    pub manifest_json: Json,
    pub manifest_blob_digest: Option<Digest>,
    pub package_type: String,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLogRow {
    pub audit_id: AuditId,
    pub tenant_id: TenantId,
    pub actor: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub details: Json,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboxEventRow {
    pub event_id: EventId,
    pub tenant_id: TenantId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Json,
    pub occurred_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivery_attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchIndexJobRow {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub version_id: VersionId,
    pub status: SearchJobStatus,
    pub available_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuarantineItemRow {
    pub item_id: QuarantineId,
    pub tenant_id: TenantId,
    pub repo_id: RepoId,
    pub version_id: VersionId,
    pub status: QuarantineStatus,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyEvaluationRow {
    pub evaluation_id: EvaluationId,
    pub tenant_id: TenantId,
    pub repo_id: RepoId,
    pub version_id: VersionId,
    pub action: PolicyAction,
    pub decision: PolicyDecision,
    pub reason: Option<String>,
    pub details: Json,
    pub evaluated_at: DateTime<Utc>,
    pub evaluated_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TombstoneRow {
    pub tombstone_id: TombstoneId,
    pub tenant_id: TenantId,
    pub repo_id: RepoId,
    pub version_id: VersionId,
    pub deleted_by: String,
    pub deleted_at: DateTime<Utc>,
    pub retention_until: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GcRunRow {
    pub run_id: GcRunId,
    pub tenant_id: TenantId,
    pub initiated_by: String,
    pub mode: GcMode,
    pub retention_grace_hours: u32,
    pub batch_size: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub marked: u64,
    pub candidate_blobs: u64,
    pub deleted_blobs: u64,
    pub deleted_versions: u64,
    pub delete_errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchDocumentRow {
    pub tenant_id: TenantId,
    pub version_id: VersionId,
    pub repo_key: String,
    pub package_type: String,
    pub namespace: Option<String>,
    pub package_name: String,
    pub version: String,
    pub manifest_json: Option<Json>,
    pub published_at: Option<DateTime<Utc>>,
    pub search_text: String,
    /// Derived from `search_text`: lowercased whitespace tokens, deduplicated.
    pub search_terms: Vec<String>,
    pub indexed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
