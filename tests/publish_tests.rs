//! Publish engine tests: atomicity, preconditions, idempotency, policy
//! gating, and post-publish immutability.
//!
//! Run with: cargo test --test publish_tests

mod common;

use artifortress::core::{ArtifortressConfig, ConflictCode, PolicyDecision, VersionState};
use artifortress::policy::{PolicyEvaluator, PolicyInput, PolicyVerdict};
use artifortress::publish::{AddEntry, CreateDraft};
use async_trait::async_trait;
use chrono::Utc;
use common::*;
use serde_json::json;
use std::sync::Arc;

async fn bare_draft(ctx: &TestContext, name: &str) -> artifortress::store::PackageVersionRow {
    ctx.service
        .publisher
        .create_draft(
            CreateDraft {
                tenant_id: ctx.tenant.tenant_id,
                repo_id: ctx.repo.repo_id,
                package_type: "maven".to_string(),
                namespace: None,
                name: name.to_string(),
                version: "1.0.0".to_string(),
                created_by: "publisher".to_string(),
            },
            Utc::now(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn publish_writes_version_audit_and_outbox_atomically() {
    let ctx = setup().await;
    let now = Utc::now();
    let draft = draft_with_content(&ctx, "core-lib", "1.0.0", b"jar bytes", now).await;

    let outcome = ctx
        .service
        .publisher
        .publish(draft.version_id, "publisher", now)
        .await
        .unwrap();
    assert_eq!(outcome.state, VersionState::Published);
    assert!(!outcome.idempotent);
    assert!(outcome.event_emitted);
    assert_eq!(outcome.version.published_at, Some(now));

    let snapshot = ctx.service.store.snapshot().await;
    let published: Vec<_> = snapshot
        .outbox_events()
        .filter(|e| e.event_type == "version.published")
        .collect();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].aggregate_id, draft.version_id.to_string());
    assert_eq!(
        published[0].payload,
        json!({ "versionId": draft.version_id.to_string() })
    );
    assert_eq!(audit_count(&ctx, "package.version.published").await, 1);
}

#[tokio::test]
async fn republish_is_idempotent_and_emits_nothing() {
    let ctx = setup().await;
    let now = Utc::now();
    let draft = draft_with_content(&ctx, "core-lib", "1.0.0", b"jar bytes", now).await;

    ctx.service
        .publisher
        .publish(draft.version_id, "publisher", now)
        .await
        .unwrap();
    let again = ctx
        .service
        .publisher
        .publish(draft.version_id, "publisher", now)
        .await
        .unwrap();
    assert!(again.idempotent);
    assert!(!again.event_emitted);
    assert_eq!(again.state, VersionState::Published);

    let snapshot = ctx.service.store.snapshot().await;
    let published = snapshot
        .outbox_events()
        .filter(|e| e.event_type == "version.published")
        .count();
    assert_eq!(published, 1);
}

#[tokio::test]
async fn concurrent_publishes_emit_exactly_one_event() {
    let ctx = setup().await;
    let now = Utc::now();
    let draft = draft_with_content(&ctx, "core-lib", "1.0.0", b"jar bytes", now).await;

    let a = ctx.service.publisher.publish(draft.version_id, "alice", now);
    let b = ctx.service.publisher.publish(draft.version_id, "bob", now);
    let (a, b) = tokio::join!(a, b);
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(
        [a.event_emitted, b.event_emitted].iter().filter(|e| **e).count(),
        1
    );
    assert_eq!([a.idempotent, b.idempotent].iter().filter(|i| **i).count(), 1);

    let snapshot = ctx.service.store.snapshot().await;
    let published = snapshot
        .outbox_events()
        .filter(|e| e.event_type == "version.published")
        .count();
    assert_eq!(published, 1);
}

#[tokio::test]
async fn publish_requires_entries_manifest_and_blobs() {
    let ctx = setup().await;
    let now = Utc::now();

    // No entries at all.
    let empty = bare_draft(&ctx, "empty").await;
    let err = ctx
        .service
        .publisher
        .publish(empty.version_id, "publisher", now)
        .await
        .unwrap_err();
    assert!(err.is_conflict(ConflictCode::PublishPreconditionsUnmet));

    // Entries but no manifest.
    let digest = upload_bytes(&ctx, b"real bytes", now).await;
    let no_manifest = bare_draft(&ctx, "no-manifest").await;
    ctx.service
        .publisher
        .add_entry(
            no_manifest.version_id,
            AddEntry {
                relative_path: "lib.jar".to_string(),
                blob_digest: digest.to_string(),
                checksum_sha1: None,
                checksum_sha256: None,
                size_bytes: 9,
            },
        )
        .await
        .unwrap();
    let err = ctx
        .service
        .publisher
        .publish(no_manifest.version_id, "publisher", now)
        .await
        .unwrap_err();
    assert!(err.is_conflict(ConflictCode::PublishPreconditionsUnmet));

    // Entry pointing at a digest that was never uploaded.
    let dangling = bare_draft(&ctx, "dangling").await;
    ctx.service
        .publisher
        .add_entry(
            dangling.version_id,
            AddEntry {
                relative_path: "lib.jar".to_string(),
                blob_digest: "f".repeat(64),
                checksum_sha1: None,
                checksum_sha256: None,
                size_bytes: 9,
            },
        )
        .await
        .unwrap();
    ctx.service
        .publisher
        .put_manifest(dangling.version_id, json!({}), None, "publisher", now)
        .await
        .unwrap();
    let err = ctx
        .service
        .publisher
        .publish(dangling.version_id, "publisher", now)
        .await
        .unwrap_err();
    assert!(err.is_conflict(ConflictCode::PublishBlobMissing));
}

#[tokio::test]
async fn quarantined_versions_cannot_publish() {
    let ctx = setup().await;
    let now = Utc::now();
    let draft = draft_with_content(&ctx, "core-lib", "1.0.0", b"jar bytes", now).await;

    ctx.service
        .policy
        .evaluate_and_record(
            draft.version_id,
            artifortress::core::PolicyAction::Publish,
            Some(PolicyVerdict {
                decision: PolicyDecision::Quarantine,
                reason: Some("malware scan pending".to_string()),
                details: serde_json::Value::Null,
            }),
            "scanner",
            now,
        )
        .await
        .unwrap();

    let err = ctx
        .service
        .publisher
        .publish(draft.version_id, "publisher", now)
        .await
        .unwrap_err();
    assert!(err.is_conflict(ConflictCode::PublishBlockedQuarantine));

    let snapshot = ctx.service.store.snapshot().await;
    assert_eq!(
        snapshot.version(draft.version_id).unwrap().state,
        VersionState::Draft
    );
}

#[tokio::test]
async fn entries_and_manifest_are_draft_only() {
    let ctx = setup().await;
    let now = Utc::now();
    let draft = draft_with_content(&ctx, "core-lib", "1.0.0", b"jar bytes", now).await;
    ctx.service
        .publisher
        .publish(draft.version_id, "publisher", now)
        .await
        .unwrap();

    let err = ctx
        .service
        .publisher
        .add_entry(
            draft.version_id,
            AddEntry {
                relative_path: "extra.jar".to_string(),
                blob_digest: "a".repeat(64),
                checksum_sha1: None,
                checksum_sha256: None,
                size_bytes: 1,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_conflict(ConflictCode::DraftOnly));

    let err = ctx
        .service
        .publisher
        .put_manifest(draft.version_id, json!({}), None, "publisher", now)
        .await
        .unwrap_err();
    assert!(err.is_conflict(ConflictCode::DraftOnly));
}

#[tokio::test]
async fn duplicate_entry_paths_and_versions_conflict() {
    let ctx = setup().await;
    let now = Utc::now();
    let digest = upload_bytes(&ctx, b"bytes", now).await;
    let draft = bare_draft(&ctx, "core-lib").await;

    let entry = AddEntry {
        relative_path: "lib.jar".to_string(),
        blob_digest: digest.to_string(),
        checksum_sha1: None,
        checksum_sha256: None,
        size_bytes: 5,
    };
    ctx.service
        .publisher
        .add_entry(draft.version_id, entry.clone())
        .await
        .unwrap();
    let err = ctx
        .service
        .publisher
        .add_entry(draft.version_id, entry)
        .await
        .unwrap_err();
    assert!(err.is_conflict(ConflictCode::UniqueViolation));

    let err = ctx
        .service
        .publisher
        .create_draft(
            CreateDraft {
                tenant_id: ctx.tenant.tenant_id,
                repo_id: ctx.repo.repo_id,
                package_type: "maven".to_string(),
                namespace: None,
                name: "core-lib".to_string(),
                version: "1.0.0".to_string(),
                created_by: "publisher".to_string(),
            },
            now,
        )
        .await
        .unwrap_err();
    assert!(err.is_conflict(ConflictCode::UniqueViolation));
}

#[tokio::test]
async fn published_identity_is_immutable_at_the_store() {
    let ctx = setup().await;
    let now = Utc::now();
    let draft = draft_with_content(&ctx, "core-lib", "1.0.0", b"jar bytes", now).await;
    ctx.service
        .publisher
        .publish(draft.version_id, "publisher", now)
        .await
        .unwrap();

    let mut txn = ctx.service.store.begin().await;
    let err = txn
        .update_version(draft.version_id, |v| {
            v.created_by = "mallory".to_string();
        })
        .unwrap_err();
    assert!(err.is_conflict(ConflictCode::ImmutableVersion));
    assert!(err.to_string().contains("deny_published_version_mutation"));

    let err = txn
        .update_version(draft.version_id, |v| {
            v.state = VersionState::Draft;
            v.published_at = None;
        })
        .unwrap_err();
    assert!(err.is_conflict(ConflictCode::ImmutableVersion));
}

struct Denier;

#[async_trait]
impl PolicyEvaluator for Denier {
    async fn evaluate(&self, _input: &PolicyInput) -> PolicyVerdict {
        PolicyVerdict {
            decision: PolicyDecision::Deny,
            reason: Some("license violation".to_string()),
            details: serde_json::Value::Null,
        }
    }
}

struct Staller;

#[async_trait]
impl PolicyEvaluator for Staller {
    async fn evaluate(&self, _input: &PolicyInput) -> PolicyVerdict {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        PolicyVerdict::allow()
    }
}

#[tokio::test]
async fn policy_denial_blocks_publish_and_records_the_decision() {
    let ctx = setup_with(ArtifortressConfig::default(), Some(Arc::new(Denier))).await;
    let now = Utc::now();
    let draft = draft_with_content(&ctx, "core-lib", "1.0.0", b"jar bytes", now).await;

    let err = ctx
        .service
        .publisher
        .publish(draft.version_id, "publisher", now)
        .await
        .unwrap_err();
    assert!(err.is_conflict(ConflictCode::PublishDenied));

    let snapshot = ctx.service.store.snapshot().await;
    assert_eq!(snapshot.version(draft.version_id).unwrap().state, VersionState::Draft);
    let decisions: Vec<_> = snapshot.policy_evaluations().collect();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].decision, PolicyDecision::Deny);
}

#[tokio::test]
async fn policy_timeout_fails_closed_with_nothing_persisted() {
    let mut config = ArtifortressConfig::default();
    config.policy.evaluation_timeout_ms = 50;
    let ctx = setup_with(config, Some(Arc::new(Staller))).await;
    let now = Utc::now();
    let draft = draft_with_content(&ctx, "core-lib", "1.0.0", b"jar bytes", now).await;

    let err = ctx
        .service
        .publisher
        .publish(draft.version_id, "publisher", now)
        .await
        .unwrap_err();
    assert_eq!(err.wire_code(), "policy_timeout");

    let snapshot = ctx.service.store.snapshot().await;
    assert_eq!(snapshot.version(draft.version_id).unwrap().state, VersionState::Draft);
    assert_eq!(snapshot.policy_evaluations().count(), 0);
    assert_eq!(
        snapshot.quarantine_items().count(),
        0,
        "no quarantine side effects on timeout"
    );
}
