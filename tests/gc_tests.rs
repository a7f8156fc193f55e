//! Tombstone and garbage collection tests.
//!
//! Run with: cargo test --test gc_tests

mod common;

use artifortress::core::{Digest, GcMode, VersionState};
use artifortress::lifecycle::GcParams;
use artifortress::ObjectBackend;
use chrono::{Duration, Utc};
use common::*;

fn params(ctx: &TestContext, mode: GcMode, grace_hours: i64, batch: i64) -> GcParams {
    GcParams {
        tenant_id: ctx.tenant.tenant_id,
        initiated_by: "gc-admin".to_string(),
        mode,
        retention_grace_hours: Some(grace_hours),
        batch_size: Some(batch),
    }
}

#[tokio::test]
async fn tombstone_is_idempotent_per_version() {
    let ctx = setup().await;
    let now = Utc::now();
    let draft = draft_with_content(&ctx, "core-lib", "1.0.0", b"bytes", now).await;
    ctx.service.publisher.publish(draft.version_id, "publisher", now).await.unwrap();

    let first = ctx
        .service
        .tombstones
        .tombstone(draft.version_id, "deleter", Some("cleanup".to_string()), Some(1), now)
        .await
        .unwrap();
    assert!(first.created);
    assert_eq!(first.version.state, VersionState::Tombstoned);
    assert_eq!(first.tombstone.retention_until, now + Duration::days(1));

    let second = ctx
        .service
        .tombstones
        .tombstone(draft.version_id, "someone-else", None, None, now + Duration::hours(1))
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.tombstone.tombstone_id, first.tombstone.tombstone_id);
    assert_eq!(second.tombstone.retention_until, first.tombstone.retention_until);
    assert_eq!(audit_count(&ctx, "package.version.tombstoned").await, 1);
}

#[tokio::test]
async fn execute_run_reclaims_expired_versions_and_orphan_blobs() {
    let ctx = setup().await;
    let t0 = Utc::now();

    // A published-then-tombstoned version with a one-day retention window,
    // plus an orphan blob nothing references.
    let draft = draft_with_content(&ctx, "core-lib", "1.0.0", b"published bytes", t0).await;
    ctx.service.publisher.publish(draft.version_id, "publisher", t0).await.unwrap();
    // A post-publish quarantine hold rides along to verify the cascade.
    ctx.service
        .policy
        .evaluate_and_record(
            draft.version_id,
            artifortress::core::PolicyAction::Publish,
            Some(artifortress::policy::PolicyVerdict {
                decision: artifortress::core::PolicyDecision::Quarantine,
                reason: Some("late scan".to_string()),
                details: serde_json::Value::Null,
            }),
            "scanner",
            t0,
        )
        .await
        .unwrap();
    ctx.service
        .tombstones
        .tombstone(draft.version_id, "deleter", None, Some(1), t0)
        .await
        .unwrap();
    let orphan_digest = upload_bytes(&ctx, b"orphan bytes", t0).await;
    let version_digest = Digest::of_bytes(b"published bytes");

    let uploading_sessions: Vec<_> = {
        let snapshot = ctx.service.store.snapshot().await;
        snapshot
            .upload_sessions()
            .filter(|s| s.committed_blob_digest.is_some())
            .map(|s| s.upload_id)
            .collect()
    };
    assert!(!uploading_sessions.is_empty());

    let later = t0 + Duration::days(2);
    let run = ctx
        .service
        .gc
        .run(params(&ctx, GcMode::Execute, 0, 10), later)
        .await
        .unwrap();

    assert_eq!(run.deleted_versions, 1);
    assert_eq!(run.deleted_blobs, 2);
    assert_eq!(run.delete_errors, 0);
    assert!(run.completed_at.is_some());

    let snapshot = ctx.service.store.snapshot().await;
    assert!(snapshot.version(draft.version_id).is_none());
    assert!(snapshot.entries_for_version(draft.version_id).is_empty());
    assert!(snapshot.manifest(draft.version_id).is_none());
    assert!(snapshot.tombstone_for_version(draft.version_id).is_none());
    assert_eq!(snapshot.quarantine_items().count(), 0);
    assert!(snapshot.blob(&version_digest).is_none());
    assert!(snapshot.blob(&orphan_digest).is_none());

    // Sessions that referenced the deleted blobs had the back-reference
    // nulled, not failed.
    for upload_id in uploading_sessions {
        let session = snapshot.upload_session(upload_id).unwrap();
        assert!(session.committed_blob_digest.is_none());
    }

    assert_eq!(audit_count(&ctx, "gc.run.started").await, 1);
    assert_eq!(audit_count(&ctx, "gc.run.completed").await, 1);
}

#[tokio::test]
async fn dry_run_counts_but_never_mutates() {
    let ctx = setup().await;
    let t0 = Utc::now();
    let draft = draft_with_content(&ctx, "core-lib", "1.0.0", b"published bytes", t0).await;
    ctx.service.publisher.publish(draft.version_id, "publisher", t0).await.unwrap();
    ctx.service
        .tombstones
        .tombstone(draft.version_id, "deleter", None, Some(1), t0)
        .await
        .unwrap();
    upload_bytes(&ctx, b"orphan bytes", t0).await;

    let (versions_before, blobs_before) = {
        let snapshot = ctx.service.store.snapshot().await;
        (snapshot.version_count(), snapshot.blob_count())
    };

    let later = t0 + Duration::days(2);
    let run = ctx
        .service
        .gc
        .run(params(&ctx, GcMode::DryRun, 0, 10), later)
        .await
        .unwrap();

    assert_eq!(run.mode, GcMode::DryRun);
    assert_eq!(run.deleted_versions, 0);
    assert_eq!(run.deleted_blobs, 0);
    assert_eq!(run.candidate_blobs, 2);
    assert!(run.completed_at.is_some());

    let snapshot = ctx.service.store.snapshot().await;
    assert_eq!(snapshot.version_count(), versions_before);
    assert_eq!(snapshot.blob_count(), blobs_before);
    assert_eq!(ctx.objects.object_count().await, 2);
}

#[tokio::test]
async fn retained_tombstones_keep_their_digests_marked() {
    let ctx = setup().await;
    let t0 = Utc::now();
    let draft = draft_with_content(&ctx, "core-lib", "1.0.0", b"retained bytes", t0).await;
    ctx.service.publisher.publish(draft.version_id, "publisher", t0).await.unwrap();
    ctx.service
        .tombstones
        .tombstone(draft.version_id, "deleter", None, Some(30), t0)
        .await
        .unwrap();

    let later = t0 + Duration::days(2);
    let run = ctx
        .service
        .gc
        .run(params(&ctx, GcMode::Execute, 0, 10), later)
        .await
        .unwrap();

    let digest = Digest::of_bytes(b"retained bytes");
    let snapshot = ctx.service.store.snapshot().await;
    let marks = snapshot.mark_set(run.run_id);
    assert!(marks.contains(&digest), "retained tombstone digests stay reachable");
    assert!(snapshot.version(draft.version_id).is_some());
    assert!(snapshot.blob(&digest).is_some());
    assert_eq!(run.deleted_versions, 0);
    assert_eq!(run.deleted_blobs, 0);
}

#[tokio::test]
async fn swept_blobs_are_never_in_the_mark_set() {
    let ctx = setup().await;
    let t0 = Utc::now();
    let published = draft_with_content(&ctx, "kept", "1.0.0", b"kept bytes", t0).await;
    ctx.service.publisher.publish(published.version_id, "publisher", t0).await.unwrap();
    let orphan = upload_bytes(&ctx, b"orphan bytes", t0).await;

    let later = t0 + Duration::days(2);
    let run = ctx
        .service
        .gc
        .run(params(&ctx, GcMode::Execute, 0, 10), later)
        .await
        .unwrap();

    let snapshot = ctx.service.store.snapshot().await;
    let marks = snapshot.mark_set(run.run_id);
    assert!(marks.contains(&Digest::of_bytes(b"kept bytes")));
    assert!(!marks.contains(&orphan));
    assert!(snapshot.blob(&orphan).is_none());
    assert!(snapshot.blob(&Digest::of_bytes(b"kept bytes")).is_some());
}

#[tokio::test]
async fn orphans_younger_than_grace_survive() {
    let ctx = setup().await;
    let t0 = Utc::now();
    let orphan = upload_bytes(&ctx, b"fresh orphan", t0).await;

    // Default grace is 24h; at t0 + 1h the orphan is too young to sweep.
    let run = ctx
        .service
        .gc
        .run(
            GcParams {
                tenant_id: ctx.tenant.tenant_id,
                initiated_by: "gc-admin".to_string(),
                mode: GcMode::Execute,
                retention_grace_hours: None,
                batch_size: None,
            },
            t0 + Duration::hours(1),
        )
        .await
        .unwrap();

    assert_eq!(run.retention_grace_hours, 24);
    assert_eq!(run.deleted_blobs, 0);
    assert!(ctx.service.store.snapshot().await.blob(&orphan).is_some());
}

#[tokio::test]
async fn draft_referenced_blobs_are_not_swept() {
    let ctx = setup().await;
    let t0 = Utc::now();
    // Draft, never published: its digests are absent from the mark set but
    // pinned by the entry reference.
    let draft = draft_with_content(&ctx, "wip", "0.1.0", b"draft bytes", t0).await;

    let later = t0 + Duration::days(2);
    let run = ctx
        .service
        .gc
        .run(params(&ctx, GcMode::Execute, 0, 10), later)
        .await
        .unwrap();

    assert_eq!(run.deleted_blobs, 0);
    let snapshot = ctx.service.store.snapshot().await;
    assert!(snapshot.version(draft.version_id).is_some());
    assert!(snapshot.blob(&Digest::of_bytes(b"draft bytes")).is_some());
}

#[tokio::test]
async fn sweep_tolerates_objects_already_gone() {
    let ctx = setup().await;
    let t0 = Utc::now();
    let orphan = upload_bytes(&ctx, b"orphan bytes", t0).await;

    // Simulate out-of-band deletion of the object.
    let storage_key = {
        let snapshot = ctx.service.store.snapshot().await;
        snapshot.blob(&orphan).unwrap().storage_key.clone()
    };
    ctx.objects.delete_object(&storage_key).await.unwrap();

    let run = ctx
        .service
        .gc
        .run(params(&ctx, GcMode::Execute, 0, 10), t0 + Duration::days(2))
        .await
        .unwrap();

    assert_eq!(run.deleted_blobs, 1);
    assert_eq!(run.delete_errors, 0);
    assert!(ctx.service.store.snapshot().await.blob(&orphan).is_none());
}

#[tokio::test]
async fn stranded_runs_are_finalized_with_an_error_mark() {
    let ctx = setup().await;
    let t0 = Utc::now();

    // A run row that never completed, as a crash would leave behind.
    {
        let mut txn = ctx.service.store.begin().await;
        txn.insert_gc_run(artifortress::store::GcRunRow {
            run_id: artifortress::core::GcRunId::new(),
            tenant_id: ctx.tenant.tenant_id,
            initiated_by: "gc-admin".to_string(),
            mode: GcMode::Execute,
            retention_grace_hours: 24,
            batch_size: 200,
            started_at: t0 - Duration::hours(6),
            completed_at: None,
            marked: 10,
            candidate_blobs: 3,
            deleted_blobs: 0,
            deleted_versions: 0,
            delete_errors: 0,
        })
        .unwrap();
        txn.commit().await;
    }

    let finalized = ctx
        .service
        .gc
        .finalize_stranded(t0 - Duration::hours(1), t0)
        .await
        .unwrap();
    assert_eq!(finalized, 1);

    let snapshot = ctx.service.store.snapshot().await;
    let run = snapshot.gc_runs().next().unwrap();
    assert!(run.completed_at.is_some());
    assert_eq!(run.delete_errors, 1);

    // Nothing left to finalize on the next pass.
    assert_eq!(
        ctx.service.gc.finalize_stranded(t0 - Duration::hours(1), t0).await.unwrap(),
        0
    );
}
