use super::dto::*;
use super::{WebError, WebResult};
use crate::core::{ArtifactError, Digest, GcRunId, QuarantineId, UploadId, VersionId};
use crate::lifecycle::GcParams;
use crate::object::{ByteRange, CompletedPart, ObjectError};
use crate::policy::{digest_blocked, PolicyVerdict};
use crate::publish::{AddEntry, CreateDraft};
use crate::service::ArtifactService;
use crate::store::{RepositoryRow, TenantRow};
use crate::upload::CreateUpload;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

type App = Arc<ArtifactService>;

pub fn router(service: App) -> Router {
    Router::new()
        .route("/repos/:repo_key/uploads", post(create_upload))
        .route("/repos/:repo_key/uploads/:upload_id/parts", post(request_part))
        .route("/repos/:repo_key/uploads/:upload_id/complete", post(complete_upload))
        .route("/repos/:repo_key/uploads/:upload_id/abort", post(abort_upload))
        .route("/repos/:repo_key/uploads/:upload_id/commit", post(commit_upload))
        .route("/repos/:repo_key/blobs/:digest", get(download_blob))
        .route("/repos/:repo_key/packages/versions/drafts", post(create_draft))
        .route(
            "/repos/:repo_key/packages/versions/:version_id/entries",
            post(add_entry),
        )
        .route(
            "/repos/:repo_key/packages/versions/:version_id/manifest",
            put(put_manifest).get(get_manifest),
        )
        .route(
            "/repos/:repo_key/packages/versions/:version_id/publish",
            post(publish_version),
        )
        .route(
            "/repos/:repo_key/packages/versions/:version_id/tombstone",
            post(tombstone_version),
        )
        .route("/repos/:repo_key/policy/evaluations", post(evaluate_policy))
        .route("/repos/:repo_key/quarantine", get(list_quarantine))
        .route("/repos/:repo_key/quarantine/:item_id", get(get_quarantine))
        .route(
            "/repos/:repo_key/quarantine/:item_id/release",
            post(release_quarantine),
        )
        .route(
            "/repos/:repo_key/quarantine/:item_id/reject",
            post(reject_quarantine),
        )
        .route("/admin/gc/runs", post(run_gc))
        .route("/admin/gc/runs/:run_id", get(get_gc_run))
        .route("/admin/reconcile/blobs", get(reconcile_blobs))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

// ----------------------------------------------------------------------
// Scope helpers: the identity layer upstream resolves tenancy; here the
// contract stub is a pair of headers.
// ----------------------------------------------------------------------

fn actor(headers: &HeaderMap) -> String {
    headers
        .get("x-actor")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string()
}

async fn scope(
    service: &ArtifactService,
    headers: &HeaderMap,
    repo_key: &str,
) -> WebResult<(TenantRow, RepositoryRow)> {
    let slug = headers
        .get("x-tenant")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WebError::input("x-tenant header is required"))?;
    let snapshot = service.store.snapshot().await;
    let tenant = snapshot
        .tenant_by_slug(slug)
        .cloned()
        .ok_or_else(|| ArtifactError::not_found(format!("tenant '{slug}'")))?;
    let repo = snapshot
        .repository_by_key(tenant.tenant_id, repo_key)
        .cloned()
        .ok_or_else(|| ArtifactError::not_found(format!("repository '{repo_key}'")))?;
    Ok((tenant, repo))
}

async fn require_session_in_repo(
    service: &ArtifactService,
    repo: &RepositoryRow,
    upload_id: UploadId,
) -> WebResult<()> {
    let snapshot = service.store.snapshot().await;
    match snapshot.upload_session(upload_id) {
        Some(session) if session.repo_id == repo.repo_id => Ok(()),
        _ => Err(ArtifactError::not_found(format!("upload session {upload_id}")).into()),
    }
}

async fn require_version_in_repo(
    service: &ArtifactService,
    repo: &RepositoryRow,
    version_id: VersionId,
) -> WebResult<()> {
    let snapshot = service.store.snapshot().await;
    match snapshot.version(version_id) {
        Some(version) if version.repo_id == repo.repo_id => Ok(()),
        _ => Err(ArtifactError::not_found(format!("package version {version_id}")).into()),
    }
}

// ----------------------------------------------------------------------
// Uploads
// ----------------------------------------------------------------------

async fn create_upload(
    State(service): State<App>,
    Path(repo_key): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateUploadBody>,
) -> WebResult<(StatusCode, Json<UploadSessionResponse>)> {
    let (tenant, repo) = scope(&service, &headers, &repo_key).await?;
    let row = service
        .uploads
        .create(
            CreateUpload {
                tenant_id: tenant.tenant_id,
                repo_id: repo.repo_id,
                expected_digest: body.expected_digest,
                expected_length: body.expected_length,
                created_by: actor(&headers),
            },
            Utc::now(),
        )
        .await?;
    let status = if row.deduped { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(row.into())))
}

async fn request_part(
    State(service): State<App>,
    Path((repo_key, upload_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    Json(body): Json<RequestPartBody>,
) -> WebResult<Json<PresignedPartResponse>> {
    let (_, repo) = scope(&service, &headers, &repo_key).await?;
    let upload_id = UploadId::from(upload_id);
    require_session_in_repo(&service, &repo, upload_id).await?;
    let part = service
        .uploads
        .request_part(upload_id, body.part_number, Utc::now())
        .await?;
    Ok(Json(PresignedPartResponse {
        part_number: part.part_number,
        url: part.url,
        expires_in_seconds: part.expires_in_seconds,
    }))
}

async fn complete_upload(
    State(service): State<App>,
    Path((repo_key, upload_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    Json(body): Json<CompleteUploadBody>,
) -> WebResult<Json<UploadSessionResponse>> {
    let (_, repo) = scope(&service, &headers, &repo_key).await?;
    let upload_id = UploadId::from(upload_id);
    require_session_in_repo(&service, &repo, upload_id).await?;
    let parts: Vec<CompletedPart> = body
        .parts
        .into_iter()
        .map(|p| CompletedPart { number: p.number, etag: p.etag })
        .collect();
    let row = service.uploads.complete(upload_id, parts, Utc::now()).await?;
    Ok(Json(row.into()))
}

async fn abort_upload(
    State(service): State<App>,
    Path((repo_key, upload_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: Option<Json<AbortUploadBody>>,
) -> WebResult<Json<UploadSessionResponse>> {
    let (_, repo) = scope(&service, &headers, &repo_key).await?;
    let upload_id = UploadId::from(upload_id);
    require_session_in_repo(&service, &repo, upload_id).await?;
    let reason = body.and_then(|Json(b)| b.reason);
    let row = service.uploads.abort(upload_id, reason, Utc::now()).await?;
    Ok(Json(row.into()))
}

async fn commit_upload(
    State(service): State<App>,
    Path((repo_key, upload_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> WebResult<Json<UploadSessionResponse>> {
    let (_, repo) = scope(&service, &headers, &repo_key).await?;
    let upload_id = UploadId::from(upload_id);
    require_session_in_repo(&service, &repo, upload_id).await?;
    let row = service.uploads.commit(upload_id, Utc::now()).await?;
    Ok(Json(row.into()))
}

// ----------------------------------------------------------------------
// Blob download
// ----------------------------------------------------------------------

async fn download_blob(
    State(service): State<App>,
    Path((repo_key, digest)): Path<(String, String)>,
    headers: HeaderMap,
) -> WebResult<Response> {
    let (_, repo) = scope(&service, &headers, &repo_key).await?;
    let digest = Digest::parse(&digest)?;

    let snapshot = service.store.snapshot().await;
    let blob = snapshot
        .blob(&digest)
        .cloned()
        .ok_or_else(|| ArtifactError::not_found(format!("blob {digest}")))?;
    if digest_blocked(&snapshot, repo.repo_id, &digest) {
        return Err(ArtifactError::QuarantinedBlob(digest.to_string()).into());
    }
    drop(snapshot);

    let range = parse_range(&headers, blob.length_bytes)?;
    let got = service
        .objects
        .get_object(&blob.storage_key, range)
        .await
        .map_err(|err| match err {
            ObjectError::InvalidRange { start, end, length } => {
                ArtifactError::RangeNotSatisfiable(format!("{start}..={end} of {length}"))
            }
            other => ArtifactError::Backend(other.to_string()),
        })?;

    let status = if got.range.is_some() { StatusCode::PARTIAL_CONTENT } else { StatusCode::OK };
    let mut builder = Response::builder()
        .status(status)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, got.bytes.len())
        .header(header::ETAG, format!("\"{}\"", got.etag));
    if let Some(ByteRange { start, end }) = got.range {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{}", got.total_length),
        );
    }
    builder
        .body(Body::from(got.bytes))
        .map_err(|err| ArtifactError::Internal(err.to_string()).into())
}

/// Parses a single-range `Range` header. Unsatisfiable ranges are 416;
/// malformed headers are ignored (full response), per RFC 9110.
fn parse_range(headers: &HeaderMap, length: u64) -> WebResult<Option<ByteRange>> {
    let Some(raw) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };
    let Some(ranges) = raw.strip_prefix("bytes=") else {
        return Ok(None);
    };
    if ranges.contains(',') {
        return Err(
            ArtifactError::RangeNotSatisfiable("multiple ranges are not supported".to_string())
                .into(),
        );
    }
    let Some((start_raw, end_raw)) = ranges.split_once('-') else {
        return Ok(None);
    };

    let unsatisfiable =
        |detail: String| WebError::from(ArtifactError::RangeNotSatisfiable(detail));

    if start_raw.is_empty() {
        // Suffix form: the final N bytes.
        let Ok(suffix) = end_raw.parse::<u64>() else {
            return Ok(None);
        };
        if suffix == 0 {
            return Err(unsatisfiable("zero-length suffix range".to_string()));
        }
        let start = length.saturating_sub(suffix);
        return Ok(Some(ByteRange { start, end: length - 1 }));
    }

    let Ok(start) = start_raw.parse::<u64>() else {
        return Ok(None);
    };
    if start >= length {
        return Err(unsatisfiable(format!("start {start} beyond object of {length} bytes")));
    }
    let end = if end_raw.is_empty() {
        length - 1
    } else {
        let Ok(end) = end_raw.parse::<u64>() else {
            return Ok(None);
        };
        end
    };
    if start > end {
        return Err(unsatisfiable(format!("start {start} after end {end}")));
    }
    Ok(Some(ByteRange { start, end: end.min(length - 1) }))
}

// ----------------------------------------------------------------------
// Drafts, entries, manifests, publish, tombstone
// ----------------------------------------------------------------------

async fn create_draft(
    State(service): State<App>,
    Path(repo_key): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateDraftBody>,
) -> WebResult<(StatusCode, Json<VersionResponse>)> {
    let (tenant, repo) = scope(&service, &headers, &repo_key).await?;
    let row = service
        .publisher
        .create_draft(
            CreateDraft {
                tenant_id: tenant.tenant_id,
                repo_id: repo.repo_id,
                package_type: body.package_type,
                namespace: body.namespace,
                name: body.name,
                version: body.version,
                created_by: actor(&headers),
            },
            Utc::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(row.into())))
}

async fn add_entry(
    State(service): State<App>,
    Path((repo_key, version_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    Json(body): Json<AddEntryBody>,
) -> WebResult<(StatusCode, Json<crate::store::ArtifactEntryRow>)> {
    let (_, repo) = scope(&service, &headers, &repo_key).await?;
    let version_id = VersionId::from(version_id);
    require_version_in_repo(&service, &repo, version_id).await?;
    let row = service
        .publisher
        .add_entry(
            version_id,
            AddEntry {
                relative_path: body.relative_path,
                blob_digest: body.blob_digest,
                checksum_sha1: body.checksum_sha1,
                checksum_sha256: body.checksum_sha256,
                size_bytes: body.size_bytes,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn put_manifest(
    State(service): State<App>,
    Path((repo_key, version_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    Json(body): Json<PutManifestBody>,
) -> WebResult<Json<crate::store::ManifestRow>> {
    let (_, repo) = scope(&service, &headers, &repo_key).await?;
    let version_id = VersionId::from(version_id);
    require_version_in_repo(&service, &repo, version_id).await?;
    let row = service
        .publisher
        .put_manifest(
            version_id,
            body.manifest_json,
            body.manifest_blob_digest,
            &actor(&headers),
            Utc::now(),
        )
        .await?;
    Ok(Json(row))
}

async fn get_manifest(
    State(service): State<App>,
    Path((repo_key, version_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> WebResult<Json<crate::store::ManifestRow>> {
    let (_, repo) = scope(&service, &headers, &repo_key).await?;
    let version_id = VersionId::from(version_id);
    require_version_in_repo(&service, &repo, version_id).await?;
    let row = service.publisher.get_manifest(version_id).await?;
    Ok(Json(row))
}

async fn publish_version(
    State(service): State<App>,
    Path((repo_key, version_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> WebResult<Json<PublishResponse>> {
    let (_, repo) = scope(&service, &headers, &repo_key).await?;
    let version_id = VersionId::from(version_id);
    require_version_in_repo(&service, &repo, version_id).await?;
    let outcome = service
        .publisher
        .publish(version_id, &actor(&headers), Utc::now())
        .await?;
    Ok(Json(outcome.into()))
}

async fn tombstone_version(
    State(service): State<App>,
    Path((repo_key, version_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: Option<Json<TombstoneBody>>,
) -> WebResult<Json<TombstoneResponse>> {
    let (_, repo) = scope(&service, &headers, &repo_key).await?;
    let version_id = VersionId::from(version_id);
    require_version_in_repo(&service, &repo, version_id).await?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let outcome = service
        .tombstones
        .tombstone(
            version_id,
            &actor(&headers),
            body.reason,
            body.retention_days,
            Utc::now(),
        )
        .await?;
    Ok(Json(TombstoneResponse {
        tombstone_id: outcome.tombstone.tombstone_id.to_string(),
        version_id: version_id.to_string(),
        state: outcome.version.state,
        retention_until: outcome.tombstone.retention_until,
        created: outcome.created,
    }))
}

// ----------------------------------------------------------------------
// Policy and quarantine
// ----------------------------------------------------------------------

async fn evaluate_policy(
    State(service): State<App>,
    Path(repo_key): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PolicyEvaluationBody>,
) -> WebResult<(StatusCode, Json<crate::store::PolicyEvaluationRow>)> {
    let (_, repo) = scope(&service, &headers, &repo_key).await?;
    let version_id = VersionId::from(body.version_id);
    require_version_in_repo(&service, &repo, version_id).await?;
    let requested = body.decision.map(|decision| PolicyVerdict {
        decision,
        reason: body.reason.clone(),
        details: body.details.clone().unwrap_or(serde_json::Value::Null),
    });
    let row = service
        .policy
        .evaluate_and_record(version_id, body.action, requested, &actor(&headers), Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn list_quarantine(
    State(service): State<App>,
    Path(repo_key): Path<String>,
    headers: HeaderMap,
) -> WebResult<Json<Vec<crate::store::QuarantineItemRow>>> {
    let (tenant, repo) = scope(&service, &headers, &repo_key).await?;
    let items = service
        .quarantine
        .list_for_repo(tenant.tenant_id, repo.repo_id)
        .await;
    Ok(Json(items))
}

async fn get_quarantine(
    State(service): State<App>,
    Path((repo_key, item_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> WebResult<Json<crate::store::QuarantineItemRow>> {
    let (_, repo) = scope(&service, &headers, &repo_key).await?;
    let item = service.quarantine.get(QuarantineId::from(item_id)).await?;
    if item.repo_id != repo.repo_id {
        return Err(ArtifactError::not_found(format!("quarantine item {item_id}")).into());
    }
    Ok(Json(item))
}

async fn release_quarantine(
    State(service): State<App>,
    Path((repo_key, item_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> WebResult<Json<crate::store::QuarantineItemRow>> {
    resolve_quarantine(service, repo_key, item_id, headers, true).await
}

async fn reject_quarantine(
    State(service): State<App>,
    Path((repo_key, item_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> WebResult<Json<crate::store::QuarantineItemRow>> {
    resolve_quarantine(service, repo_key, item_id, headers, false).await
}

async fn resolve_quarantine(
    service: App,
    repo_key: String,
    item_id: Uuid,
    headers: HeaderMap,
    release: bool,
) -> WebResult<Json<crate::store::QuarantineItemRow>> {
    let (_, repo) = scope(&service, &headers, &repo_key).await?;
    let item_id = QuarantineId::from(item_id);
    let item = service.quarantine.get(item_id).await?;
    if item.repo_id != repo.repo_id {
        return Err(ArtifactError::not_found(format!("quarantine item {item_id}")).into());
    }
    let by = actor(&headers);
    let row = if release {
        service.quarantine.release(item_id, &by, Utc::now()).await?
    } else {
        service.quarantine.reject(item_id, &by, Utc::now()).await?
    };
    Ok(Json(row))
}

// ----------------------------------------------------------------------
// Admin
// ----------------------------------------------------------------------

async fn run_gc(
    State(service): State<App>,
    headers: HeaderMap,
    Json(body): Json<GcRunBody>,
) -> WebResult<(StatusCode, Json<crate::store::GcRunRow>)> {
    let slug = headers
        .get("x-tenant")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WebError::input("x-tenant header is required"))?;
    let snapshot = service.store.snapshot().await;
    let tenant = snapshot
        .tenant_by_slug(slug)
        .cloned()
        .ok_or_else(|| ArtifactError::not_found(format!("tenant '{slug}'")))?;
    drop(snapshot);

    let row = service
        .gc
        .run(
            GcParams {
                tenant_id: tenant.tenant_id,
                initiated_by: actor(&headers),
                mode: body.mode,
                retention_grace_hours: body.retention_grace_hours,
                batch_size: body.batch_size,
            },
            Utc::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn get_gc_run(
    State(service): State<App>,
    Path(run_id): Path<Uuid>,
) -> WebResult<Json<crate::store::GcRunRow>> {
    let snapshot = service.store.snapshot().await;
    snapshot
        .gc_run(GcRunId::from(run_id))
        .cloned()
        .map(Json)
        .ok_or_else(|| ArtifactError::not_found(format!("gc run {run_id}")).into())
}

async fn reconcile_blobs(
    State(service): State<App>,
    headers: HeaderMap,
    Query(query): Query<ReconcileQuery>,
) -> WebResult<Json<crate::reconcile::ReconcileReport>> {
    let slug = headers
        .get("x-tenant")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WebError::input("x-tenant header is required"))?;
    let snapshot = service.store.snapshot().await;
    let tenant = snapshot
        .tenant_by_slug(slug)
        .cloned()
        .ok_or_else(|| ArtifactError::not_found(format!("tenant '{slug}'")))?;
    drop(snapshot);

    let limit = query.limit.unwrap_or(20).min(500);
    let report = service
        .reconciler
        .scan(tenant.tenant_id, limit, &actor(&headers), Utc::now())
        .await?;
    Ok(Json(report))
}
