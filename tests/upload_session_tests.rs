//! Upload session lifecycle tests.
//!
//! Run with: cargo test --test upload_session_tests

mod common;

use artifortress::core::{ConflictCode, Digest, UploadState};
use artifortress::upload::CreateUpload;
use chrono::{Duration, Utc};
use common::*;

fn create_request(ctx: &TestContext, digest: &str, length: i64) -> CreateUpload {
    CreateUpload {
        tenant_id: ctx.tenant.tenant_id,
        repo_id: ctx.repo.repo_id,
        expected_digest: digest.to_string(),
        expected_length: length,
        created_by: "uploader".to_string(),
    }
}

#[tokio::test]
async fn create_rejects_malformed_digests() {
    let ctx = setup().await;
    let now = Utc::now();

    for bad in ["abc", &"A".repeat(64), &"z".repeat(64), &"a".repeat(63)] {
        let err = ctx
            .service
            .uploads
            .create(create_request(&ctx, bad, 10), now)
            .await
            .unwrap_err();
        assert_eq!(err.wire_code(), "validation_error", "digest {bad:?}");
    }
}

#[tokio::test]
async fn create_rejects_non_positive_length() {
    let ctx = setup().await;
    let now = Utc::now();
    let digest = "a".repeat(64);

    for bad in [0, -1] {
        let err = ctx
            .service
            .uploads
            .create(create_request(&ctx, &digest, bad), now)
            .await
            .unwrap_err();
        assert_eq!(err.wire_code(), "validation_error", "length {bad}");
    }
}

#[tokio::test]
async fn multipart_commit_creates_the_blob() {
    let ctx = setup().await;
    let now = Utc::now();
    let bytes = b"the artifact payload";

    let session = upload_session_for(&ctx, bytes, now).await;
    assert_eq!(session.state, UploadState::Initiated);
    assert!(!session.deduped);
    finish_upload(&ctx, &session, bytes, now).await;

    let snapshot = ctx.service.store.snapshot().await;
    let committed = snapshot.upload_session(session.upload_id).unwrap();
    assert_eq!(committed.state, UploadState::Committed);
    assert_eq!(committed.committed_blob_digest, Some(session.expected_digest.clone()));

    // Invariant: a committed session implies a blob matching its
    // expectations.
    let blob = snapshot.blob(&session.expected_digest).unwrap();
    assert_eq!(blob.length_bytes, bytes.len() as u64);
    assert_eq!(blob.digest, Digest::of_bytes(bytes));

    assert_eq!(audit_count(&ctx, "upload.committed").await, 1);
    let outbox: Vec<_> = snapshot
        .outbox_events()
        .filter(|e| e.event_type == "upload.committed")
        .collect();
    assert_eq!(outbox.len(), 1);
}

#[tokio::test]
async fn dedupe_fast_path_skips_the_object_backend() {
    let ctx = setup().await;
    let now = Utc::now();
    let bytes = vec![7u8; 1024];

    upload_bytes(&ctx, &bytes, now).await;
    let objects_before = ctx.objects.object_count().await;

    let session = upload_session_for(&ctx, &bytes, now).await;
    assert_eq!(session.state, UploadState::Committed);
    assert!(session.deduped);
    assert_eq!(session.committed_blob_digest, Some(Digest::of_bytes(&bytes)));

    // No multipart was started and nothing new landed in object storage.
    assert_eq!(ctx.objects.active_upload_count().await, 0);
    assert_eq!(ctx.objects.object_count().await, objects_before);

    let snapshot = ctx.service.store.snapshot().await;
    assert_eq!(snapshot.blob_count(), 1);
}

#[tokio::test]
async fn dedupe_with_wrong_length_is_a_validation_error() {
    let ctx = setup().await;
    let now = Utc::now();
    let bytes = b"content";
    let digest = upload_bytes(&ctx, bytes, now).await;

    let err = ctx
        .service
        .uploads
        .create(create_request(&ctx, digest.as_str(), 999), now)
        .await
        .unwrap_err();
    assert_eq!(err.wire_code(), "validation_error");
}

#[tokio::test]
async fn commit_mismatch_aborts_the_session() {
    let ctx = setup().await;
    let now = Utc::now();
    let actual = b"what was actually uploaded";
    let expected_digest = Digest::of_bytes(b"something else entirely");

    let session = ctx
        .service
        .uploads
        .create(
            create_request(&ctx, expected_digest.as_str(), actual.len() as i64),
            now,
        )
        .await
        .unwrap();
    ctx.service
        .uploads
        .request_part(session.upload_id, 1, now)
        .await
        .unwrap();
    let staging = session.object_staging_key.clone().unwrap();
    let upload = session.storage_upload_id.clone().unwrap();
    let etag = ctx
        .objects
        .put_part(&staging, &upload, 1, actual.to_vec())
        .await
        .unwrap();
    ctx.service
        .uploads
        .complete(
            session.upload_id,
            vec![artifortress::object::CompletedPart { number: 1, etag }],
            now,
        )
        .await
        .unwrap();

    let err = ctx
        .service
        .uploads
        .commit(session.upload_id, now)
        .await
        .unwrap_err();
    assert!(err.is_conflict(ConflictCode::UploadVerificationFailed));

    let snapshot = ctx.service.store.snapshot().await;
    let aborted = snapshot.upload_session(session.upload_id).unwrap();
    assert_eq!(aborted.state, UploadState::Aborted);
    assert_eq!(aborted.aborted_reason.as_deref(), Some("upload_verification_failed"));

    // Neither digest got a blob row, and the staging object is gone.
    assert!(snapshot.blob(&expected_digest).is_none());
    assert!(snapshot.blob(&Digest::of_bytes(actual)).is_none());
    assert!(!ctx.objects.object_exists(&staging).await);
    assert_eq!(audit_count(&ctx, "upload.commit.verification_failed").await, 1);
}

#[tokio::test]
async fn aborted_sessions_reject_further_commands() {
    let ctx = setup().await;
    let now = Utc::now();
    let session = upload_session_for(&ctx, b"abandoned", now).await;

    ctx.service
        .uploads
        .abort(session.upload_id, Some("changed my mind".to_string()), now)
        .await
        .unwrap();

    let err = ctx
        .service
        .uploads
        .request_part(session.upload_id, 1, now)
        .await
        .unwrap_err();
    assert!(err.is_conflict(ConflictCode::UploadSessionState));

    let err = ctx
        .service
        .uploads
        .abort(session.upload_id, None, now)
        .await
        .unwrap_err();
    assert!(err.is_conflict(ConflictCode::UploadSessionState));
}

#[tokio::test]
async fn expiry_sweep_aborts_stale_sessions() {
    let ctx = setup().await;
    let t0 = Utc::now();
    let session = upload_session_for(&ctx, b"slow upload", t0).await;

    let after_deadline = session.expires_at + Duration::seconds(1);
    let err = ctx
        .service
        .uploads
        .request_part(session.upload_id, 1, after_deadline)
        .await
        .unwrap_err();
    assert!(err.is_conflict(ConflictCode::UploadSessionState));

    let swept = ctx.service.uploads.sweep_expired(after_deadline).await.unwrap();
    assert_eq!(swept, 1);

    let snapshot = ctx.service.store.snapshot().await;
    let row = snapshot.upload_session(session.upload_id).unwrap();
    assert_eq!(row.state, UploadState::Aborted);
    assert_eq!(row.aborted_reason.as_deref(), Some("session_expired"));
    assert_eq!(ctx.objects.active_upload_count().await, 0);

    // Terminal sessions are left alone by later sweeps.
    assert_eq!(ctx.service.uploads.sweep_expired(after_deadline).await.unwrap(), 0);
}

#[tokio::test]
async fn concurrent_uploads_of_the_same_bytes_converge_on_one_blob() {
    let ctx = setup().await;
    let now = Utc::now();
    let bytes = b"raced content";

    // Both sessions open before either commits, so neither takes the
    // dedupe fast path.
    let first = upload_session_for(&ctx, bytes, now).await;
    let second = upload_session_for(&ctx, bytes, now).await;
    assert!(!first.deduped);
    assert!(!second.deduped);

    finish_upload(&ctx, &first, bytes, now).await;
    finish_upload(&ctx, &second, bytes, now).await;

    let snapshot = ctx.service.store.snapshot().await;
    assert_eq!(snapshot.blob_count(), 1);
    for session in [&first, &second] {
        let row = snapshot.upload_session(session.upload_id).unwrap();
        assert_eq!(row.state, UploadState::Committed);
        assert_eq!(row.committed_blob_digest, Some(Digest::of_bytes(bytes)));
    }

    // The loser's staged object was cleaned up; only the winner's bytes
    // remain.
    let blob = snapshot.blob(&Digest::of_bytes(bytes)).unwrap();
    assert_eq!(blob.storage_key, first.object_staging_key.clone().unwrap());
    assert!(!ctx.objects.object_exists(&second.object_staging_key.clone().unwrap()).await);
}
