//! Request and response bodies for the HTTP surface.

use crate::core::{GcMode, PolicyAction, PolicyDecision, UploadState, VersionState};
use crate::publish::PublishOutcome;
use crate::store::{PackageVersionRow, UploadSessionRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Deserialize)]
pub struct CreateUploadBody {
    pub expected_digest: String,
    pub expected_length: i64,
}

#[derive(Debug, Serialize)]
pub struct UploadSessionResponse {
    pub upload_id: String,
    pub state: UploadState,
    pub deduped: bool,
    pub expected_digest: String,
    pub expected_length: u64,
    pub committed_blob_digest: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub aborted_reason: Option<String>,
}

impl From<UploadSessionRow> for UploadSessionResponse {
    fn from(row: UploadSessionRow) -> Self {
        Self {
            upload_id: row.upload_id.to_string(),
            state: row.state,
            deduped: row.deduped,
            expected_digest: row.expected_digest.to_string(),
            expected_length: row.expected_length,
            committed_blob_digest: row.committed_blob_digest.map(|d| d.to_string()),
            expires_at: row.expires_at,
            aborted_reason: row.aborted_reason,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RequestPartBody {
    pub part_number: u32,
}

#[derive(Debug, Serialize)]
pub struct PresignedPartResponse {
    pub part_number: u32,
    pub url: String,
    pub expires_in_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct CompletedPartBody {
    pub number: u32,
    pub etag: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteUploadBody {
    pub parts: Vec<CompletedPartBody>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AbortUploadBody {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDraftBody {
    pub package_type: String,
    pub namespace: Option<String>,
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version_id: String,
    pub version: String,
    pub state: VersionState,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub tombstoned_at: Option<DateTime<Utc>>,
}

impl From<PackageVersionRow> for VersionResponse {
    fn from(row: PackageVersionRow) -> Self {
        Self {
            version_id: row.version_id.to_string(),
            version: row.version,
            state: row.state,
            created_by: row.created_by,
            created_at: row.created_at,
            published_at: row.published_at,
            tombstoned_at: row.tombstoned_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddEntryBody {
    pub relative_path: String,
    pub blob_digest: String,
    pub checksum_sha1: Option<String>,
    pub checksum_sha256: Option<String>,
    pub size_bytes: i64,
}

#[derive(Debug, Deserialize)]
pub struct PutManifestBody {
    pub manifest_json: Json,
    pub manifest_blob_digest: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub version_id: String,
    pub state: VersionState,
    pub idempotent: bool,
    pub event_emitted: bool,
    pub published_at: Option<DateTime<Utc>>,
}

impl From<PublishOutcome> for PublishResponse {
    fn from(outcome: PublishOutcome) -> Self {
        Self {
            version_id: outcome.version.version_id.to_string(),
            state: outcome.state,
            idempotent: outcome.idempotent,
            event_emitted: outcome.event_emitted,
            published_at: outcome.version.published_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TombstoneBody {
    pub reason: Option<String>,
    pub retention_days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct TombstoneResponse {
    pub tombstone_id: String,
    pub version_id: String,
    pub state: VersionState,
    pub retention_until: DateTime<Utc>,
    pub created: bool,
}

#[derive(Debug, Deserialize)]
pub struct PolicyEvaluationBody {
    pub version_id: uuid::Uuid,
    pub action: PolicyAction,
    /// Explicit decision; when absent the configured evaluator decides.
    pub decision: Option<PolicyDecision>,
    pub reason: Option<String>,
    pub details: Option<Json>,
}

#[derive(Debug, Deserialize)]
pub struct GcRunBody {
    pub mode: GcMode,
    pub retention_grace_hours: Option<i64>,
    pub batch_size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReconcileQuery {
    pub limit: Option<usize>,
}
