//! Upload session lifecycle.
//!
//! A session tracks one client upload from creation through verification.
//! Bytes travel client → object backend via presigned part URLs; the
//! session row records expectations (digest, length) and the commit step
//! verifies the staged object against them before the Blob row appears.
//!
//! Committed content is content-addressed: a second upload of bytes the
//! store already holds short-circuits to the dedupe fast path, and a lost
//! race on the Blob upsert resolves first-writer-wins.

pub mod sweeper;

use crate::core::types::validate_expected_length;
use crate::core::{
    ArtifactError, ConflictCode, Digest, DigestHasher, RepoId, Result, TenantId, UploadId,
    UploadState,
};
use crate::core::UploadConfig;
use crate::object::{CompletedPart, ObjectBackend, ObjectError};
use crate::store::{BlobRow, MetadataStore, UploadSessionRow};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const VERIFY_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct CreateUpload {
    pub tenant_id: TenantId,
    pub repo_id: RepoId,
    pub expected_digest: String,
    pub expected_length: i64,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct PresignedPart {
    pub part_number: u32,
    pub url: String,
    pub expires_in_seconds: u64,
}

pub struct UploadSessionManager {
    store: MetadataStore,
    objects: Arc<dyn ObjectBackend>,
    config: UploadConfig,
}

impl UploadSessionManager {
    pub fn new(store: MetadataStore, objects: Arc<dyn ObjectBackend>, config: UploadConfig) -> Self {
        Self { store, objects, config }
    }

    /// Opens a session. When the digest is already present in the blob
    /// table the session is born `committed` with `deduped = true` and no
    /// multipart upload is started.
    pub async fn create(&self, req: CreateUpload, now: DateTime<Utc>) -> Result<UploadSessionRow> {
        let expected_digest = Digest::parse(&req.expected_digest)?;
        let expected_length = validate_expected_length(req.expected_length)?;

        let mut txn = self.store.begin().await;
        if txn.repository(req.repo_id).is_none() {
            return Err(ArtifactError::not_found(format!("repository {}", req.repo_id)));
        }

        let upload_id = UploadId::new();
        let expires_at = now + self.config.session_ttl();

        if let Some(blob) = txn.blob(&expected_digest) {
            if blob.length_bytes != expected_length {
                return Err(ArtifactError::validation(format!(
                    "expected_length {} does not match existing content of {} bytes",
                    expected_length, blob.length_bytes
                )));
            }
            let row = UploadSessionRow {
                upload_id,
                tenant_id: req.tenant_id,
                repo_id: req.repo_id,
                expected_digest: expected_digest.clone(),
                expected_length,
                state: UploadState::Committed,
                object_staging_key: None,
                storage_upload_id: None,
                committed_blob_digest: Some(expected_digest.clone()),
                deduped: true,
                created_by: req.created_by.clone(),
                created_at: now,
                updated_at: now,
                expires_at,
                aborted_reason: None,
            };
            txn.insert_upload_session(row.clone())?;
            txn.record_audit(
                req.tenant_id,
                &req.created_by,
                "upload.created",
                "upload_session",
                upload_id,
                json!({ "digest": expected_digest.as_str(), "deduped": true }),
                now,
            );
            txn.commit().await;
            info!(%upload_id, digest = %expected_digest, "upload deduped against existing blob");
            return Ok(row);
        }

        let staging_key = staging_key(req.tenant_id, upload_id);
        let storage_upload_id = self
            .objects
            .begin_multipart(&staging_key)
            .await
            .map_err(object_unavailable)?;

        let row = UploadSessionRow {
            upload_id,
            tenant_id: req.tenant_id,
            repo_id: req.repo_id,
            expected_digest: expected_digest.clone(),
            expected_length,
            state: UploadState::Initiated,
            object_staging_key: Some(staging_key.clone()),
            storage_upload_id: Some(storage_upload_id.clone()),
            committed_blob_digest: None,
            deduped: false,
            created_by: req.created_by.clone(),
            created_at: now,
            updated_at: now,
            expires_at,
            aborted_reason: None,
        };
        if let Err(err) = txn.insert_upload_session(row.clone()) {
            drop(txn);
            let _ = self.objects.abort_multipart(&staging_key, &storage_upload_id).await;
            return Err(err);
        }
        txn.record_audit(
            req.tenant_id,
            &req.created_by,
            "upload.created",
            "upload_session",
            upload_id,
            json!({ "digest": expected_digest.as_str(), "deduped": false }),
            now,
        );
        txn.commit().await;
        Ok(row)
    }

    /// Issues a presigned URL for one part. Legal while the session is
    /// `initiated` or `parts_uploading` and not past its deadline.
    pub async fn request_part(
        &self,
        upload_id: UploadId,
        part_number: u32,
        now: DateTime<Utc>,
    ) -> Result<PresignedPart> {
        if part_number == 0 {
            return Err(ArtifactError::validation("part_number must be at least 1"));
        }

        let mut txn = self.store.begin().await;
        let session = fetch_session(&txn, upload_id)?;
        require_not_expired(&session, now)?;
        match session.state {
            UploadState::Initiated | UploadState::PartsUploading => {}
            other => return Err(session_state_conflict("request_part", other)),
        }
        let staging_key = require_staging(&session)?;
        let storage_upload_id = require_storage_upload(&session)?;

        txn.update_upload_session(upload_id, |s| {
            s.state = UploadState::PartsUploading;
            s.updated_at = now;
        })?;
        txn.commit().await;

        let url = self
            .objects
            .presign_part(
                &staging_key,
                &storage_upload_id,
                part_number,
                self.config.presign_ttl(),
            )
            .await
            .map_err(object_unavailable)?;
        Ok(PresignedPart {
            part_number,
            url,
            expires_in_seconds: self.config.presign_ttl_seconds,
        })
    }

    /// Finishes the multipart upload from the parts the client acknowledges
    /// and parks the session in `pending_commit`.
    pub async fn complete(
        &self,
        upload_id: UploadId,
        parts: Vec<CompletedPart>,
        now: DateTime<Utc>,
    ) -> Result<UploadSessionRow> {
        let mut txn = self.store.begin().await;
        let session = fetch_session(&txn, upload_id)?;
        require_not_expired(&session, now)?;
        if session.state != UploadState::PartsUploading {
            return Err(session_state_conflict("complete", session.state));
        }
        let staging_key = require_staging(&session)?;
        let storage_upload_id = require_storage_upload(&session)?;

        match self
            .objects
            .complete_multipart(&staging_key, &storage_upload_id, &parts)
            .await
        {
            Ok(_etag) => {}
            Err(ObjectError::InvalidPart(detail)) => {
                return Err(ArtifactError::validation(format!("parts not acknowledged: {detail}")));
            }
            Err(ObjectError::NoSuchUpload(_)) => {
                return Err(session_state_conflict("complete", session.state));
            }
            Err(err) => return Err(object_unavailable(err)),
        }

        let row = txn.update_upload_session(upload_id, |s| {
            s.state = UploadState::PendingCommit;
            s.updated_at = now;
        })?;
        txn.commit().await;
        Ok(row)
    }

    /// Verifies the staged object against the session's expectations and
    /// either upserts the Blob row or aborts the session.
    pub async fn commit(&self, upload_id: UploadId, now: DateTime<Utc>) -> Result<UploadSessionRow> {
        let mut txn = self.store.begin().await;
        let session = fetch_session(&txn, upload_id)?;
        if session.state != UploadState::PendingCommit {
            return Err(session_state_conflict("commit", session.state));
        }
        let staging_key = require_staging(&session)?;

        let staged = self
            .objects
            .get_object(&staging_key, None)
            .await
            .map_err(object_unavailable)?;

        let mut hasher = DigestHasher::new();
        for chunk in staged.bytes.chunks(VERIFY_CHUNK_BYTES) {
            hasher.update(chunk);
        }
        let actual_length = hasher.bytes_seen();
        let actual_digest = hasher.finalize();

        if actual_digest != session.expected_digest || actual_length != session.expected_length {
            txn.update_upload_session(upload_id, |s| {
                s.state = UploadState::Aborted;
                s.aborted_reason = Some("upload_verification_failed".to_string());
                s.updated_at = now;
            })?;
            txn.record_audit(
                session.tenant_id,
                &session.created_by,
                "upload.commit.verification_failed",
                "upload_session",
                upload_id,
                json!({
                    "expected_digest": session.expected_digest.as_str(),
                    "actual_digest": actual_digest.as_str(),
                    "expected_length": session.expected_length,
                    "actual_length": actual_length,
                }),
                now,
            );
            txn.commit().await;
            if let Err(err) = self.objects.delete_object(&staging_key).await {
                warn!(%upload_id, error = %err, "could not delete staging object after failed verification");
            }
            return Err(ArtifactError::conflict(
                ConflictCode::UploadVerificationFailed,
                format!(
                    "staged content hashed to {actual_digest}, expected {}",
                    session.expected_digest
                ),
            ));
        }

        let inserted = txn.upsert_blob(BlobRow {
            digest: actual_digest.clone(),
            length_bytes: actual_length,
            storage_key: staging_key.clone(),
            object_etag: Some(staged.etag.clone()),
            created_at: now,
        })?;
        let lost_race_key = if inserted {
            None
        } else {
            // Another session committed the same bytes first; our staged
            // copy is now redundant.
            txn.blob(&actual_digest)
                .filter(|b| b.storage_key != staging_key)
                .map(|_| staging_key.clone())
        };

        let row = txn.update_upload_session(upload_id, |s| {
            s.state = UploadState::Committed;
            s.committed_blob_digest = Some(actual_digest.clone());
            s.updated_at = now;
        })?;
        txn.record_audit(
            session.tenant_id,
            &session.created_by,
            "upload.committed",
            "upload_session",
            upload_id,
            json!({ "digest": actual_digest.as_str(), "length": actual_length }),
            now,
        );
        txn.append_outbox(crate::store::OutboxEventRow {
            event_id: crate::core::EventId::new(),
            tenant_id: session.tenant_id,
            aggregate_type: "upload_session".to_string(),
            aggregate_id: upload_id.to_string(),
            event_type: "upload.committed".to_string(),
            payload: json!({ "uploadId": upload_id.to_string(), "digest": actual_digest.as_str() }),
            occurred_at: now,
            available_at: now,
            delivered_at: None,
            delivery_attempts: 0,
        });
        txn.commit().await;

        if let Some(key) = lost_race_key {
            if let Err(err) = self.objects.delete_object(&key).await {
                warn!(%upload_id, error = %err, "could not delete redundant staged object");
            }
        }
        info!(%upload_id, digest = %actual_digest, deduped = !inserted, "upload committed");
        Ok(row)
    }

    /// Aborts an active session. Terminal sessions reject the command.
    pub async fn abort(
        &self,
        upload_id: UploadId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<UploadSessionRow> {
        let mut txn = self.store.begin().await;
        let session = fetch_session(&txn, upload_id)?;
        if session.state.is_terminal() {
            return Err(session_state_conflict("abort", session.state));
        }
        let row = txn.update_upload_session(upload_id, |s| {
            s.state = UploadState::Aborted;
            s.aborted_reason = Some(reason.unwrap_or_else(|| "client_abort".to_string()));
            s.updated_at = now;
        })?;
        txn.record_audit(
            session.tenant_id,
            &session.created_by,
            "upload.aborted",
            "upload_session",
            upload_id,
            json!({ "reason": row.aborted_reason }),
            now,
        );
        txn.commit().await;

        self.abort_staging(&session).await;
        Ok(row)
    }

    pub(crate) async fn abort_staging(&self, session: &UploadSessionRow) {
        if let (Some(key), Some(storage_upload_id)) =
            (&session.object_staging_key, &session.storage_upload_id)
        {
            if let Err(err) = self.objects.abort_multipart(key, storage_upload_id).await {
                warn!(upload_id = %session.upload_id, error = %err, "abort_multipart failed");
            }
        }
    }

    pub(crate) fn store(&self) -> &MetadataStore {
        &self.store
    }
}

fn staging_key(tenant_id: TenantId, upload_id: UploadId) -> String {
    format!("staging/{tenant_id}/{upload_id}")
}

fn fetch_session(
    state: &crate::store::StoreState,
    upload_id: UploadId,
) -> Result<UploadSessionRow> {
    state
        .upload_session(upload_id)
        .cloned()
        .ok_or_else(|| ArtifactError::not_found(format!("upload session {upload_id}")))
}

fn require_not_expired(session: &UploadSessionRow, now: DateTime<Utc>) -> Result<()> {
    if session.expires_at <= now {
        Err(ArtifactError::conflict(
            ConflictCode::UploadSessionState,
            "upload session has expired",
        ))
    } else {
        Ok(())
    }
}

fn require_staging(session: &UploadSessionRow) -> Result<String> {
    session
        .object_staging_key
        .clone()
        .ok_or_else(|| ArtifactError::Internal("session has no staging key".to_string()))
}

fn require_storage_upload(session: &UploadSessionRow) -> Result<String> {
    session
        .storage_upload_id
        .clone()
        .ok_or_else(|| ArtifactError::Internal("session has no multipart upload id".to_string()))
}

fn session_state_conflict(command: &str, state: UploadState) -> ArtifactError {
    ArtifactError::conflict(
        ConflictCode::UploadSessionState,
        format!("{command} not legal in state '{}'", state.as_str()),
    )
}

fn object_unavailable(err: ObjectError) -> ArtifactError {
    ArtifactError::Backend(err.to_string())
}
