//! Expiry sweep for upload sessions.
//!
//! Active sessions whose deadline has passed transition to `aborted`; their
//! multipart uploads are discarded best-effort after the transaction
//! commits.

use super::UploadSessionManager;
use crate::core::{Result, UploadState};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

impl UploadSessionManager {
    /// Aborts every expired active session. Returns how many were swept.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut txn = self.store().begin().await;
        let expired = txn.expired_upload_sessions(now);
        if expired.is_empty() {
            return Ok(0);
        }
        for session in &expired {
            txn.update_upload_session(session.upload_id, |s| {
                s.state = UploadState::Aborted;
                s.aborted_reason = Some("session_expired".to_string());
                s.updated_at = now;
            })?;
            txn.record_audit(
                session.tenant_id,
                "system",
                "upload.aborted",
                "upload_session",
                session.upload_id,
                json!({ "reason": "session_expired" }),
                now,
            );
        }
        txn.commit().await;

        for session in &expired {
            self.abort_staging(session).await;
        }
        debug!(count = expired.len(), "expired upload sessions swept");
        Ok(expired.len())
    }
}
