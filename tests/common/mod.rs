//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use artifortress::core::{ArtifortressConfig, Digest, RepoType};
use artifortress::object::{CompletedPart, MemoryObjectStore};
use artifortress::policy::PolicyEvaluator;
use artifortress::publish::{AddEntry, CreateDraft};
use artifortress::service::ArtifactService;
use artifortress::store::{PackageVersionRow, RepositoryRow, TenantRow, UploadSessionRow};
use artifortress::upload::CreateUpload;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;

pub struct TestContext {
    pub service: Arc<ArtifactService>,
    pub objects: Arc<MemoryObjectStore>,
    pub tenant: TenantRow,
    pub repo: RepositoryRow,
}

pub async fn setup() -> TestContext {
    setup_with(ArtifortressConfig::default(), None).await
}

pub async fn setup_with(
    config: ArtifortressConfig,
    evaluator: Option<Arc<dyn PolicyEvaluator>>,
) -> TestContext {
    let objects = Arc::new(MemoryObjectStore::new());
    let service = Arc::new(ArtifactService::with_parts(config, objects.clone(), evaluator));
    let now = Utc::now();
    let tenant = service.create_tenant("acme", "Acme Corp", now).await.unwrap();
    let repo = service
        .create_repository(tenant.tenant_id, "maven-central", RepoType::Local, now)
        .await
        .unwrap();
    TestContext { service, objects, tenant, repo }
}

/// Runs the full multipart flow for `bytes` and returns the digest. Takes
/// the dedupe fast path automatically when the content is already stored.
pub async fn upload_bytes(ctx: &TestContext, bytes: &[u8], now: DateTime<Utc>) -> Digest {
    let session = upload_session_for(ctx, bytes, now).await;
    if session.deduped {
        return session.expected_digest;
    }
    finish_upload(ctx, &session, bytes, now).await;
    session.expected_digest
}

pub async fn upload_session_for(
    ctx: &TestContext,
    bytes: &[u8],
    now: DateTime<Utc>,
) -> UploadSessionRow {
    let digest = Digest::of_bytes(bytes);
    ctx.service
        .uploads
        .create(
            CreateUpload {
                tenant_id: ctx.tenant.tenant_id,
                repo_id: ctx.repo.repo_id,
                expected_digest: digest.to_string(),
                expected_length: bytes.len() as i64,
                created_by: "uploader".to_string(),
            },
            now,
        )
        .await
        .unwrap()
}

/// Uploads one part and drives the session through complete + commit.
pub async fn finish_upload(
    ctx: &TestContext,
    session: &UploadSessionRow,
    bytes: &[u8],
    now: DateTime<Utc>,
) {
    ctx.service
        .uploads
        .request_part(session.upload_id, 1, now)
        .await
        .unwrap();
    let staging = session.object_staging_key.clone().unwrap();
    let storage_upload_id = session.storage_upload_id.clone().unwrap();
    let etag = ctx
        .objects
        .put_part(&staging, &storage_upload_id, 1, bytes.to_vec())
        .await
        .unwrap();
    ctx.service
        .uploads
        .complete(session.upload_id, vec![CompletedPart { number: 1, etag }], now)
        .await
        .unwrap();
    ctx.service
        .uploads
        .commit(session.upload_id, now)
        .await
        .unwrap();
}

/// Creates a draft with one artifact entry (backed by uploaded bytes) and a
/// manifest, ready to publish.
pub async fn draft_with_content(
    ctx: &TestContext,
    name: &str,
    version: &str,
    bytes: &[u8],
    now: DateTime<Utc>,
) -> PackageVersionRow {
    let digest = upload_bytes(ctx, bytes, now).await;
    let draft = ctx
        .service
        .publisher
        .create_draft(
            CreateDraft {
                tenant_id: ctx.tenant.tenant_id,
                repo_id: ctx.repo.repo_id,
                package_type: "maven".to_string(),
                namespace: Some("com.acme".to_string()),
                name: name.to_string(),
                version: version.to_string(),
                created_by: "publisher".to_string(),
            },
            now,
        )
        .await
        .unwrap();
    ctx.service
        .publisher
        .add_entry(
            draft.version_id,
            AddEntry {
                relative_path: format!("{name}-{version}.jar"),
                blob_digest: digest.to_string(),
                checksum_sha1: None,
                checksum_sha256: Some(digest.to_string()),
                size_bytes: bytes.len() as i64,
            },
        )
        .await
        .unwrap();
    ctx.service
        .publisher
        .put_manifest(
            draft.version_id,
            json!({ "name": name, "version": version }),
            None,
            "publisher",
            now,
        )
        .await
        .unwrap();
    draft
}

/// Counts audit rows with the given action.
pub async fn audit_count(ctx: &TestContext, action: &str) -> usize {
    ctx.service
        .store
        .snapshot()
        .await
        .audits()
        .filter(|a| a.action == action)
        .count()
}
