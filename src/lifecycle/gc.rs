//! Mark-and-sweep garbage collection.
//!
//! A run first persists the reachable digest set (the mark), then — in
//! execute mode only — deletes expired tombstoned versions in batches and
//! sweeps unmarked, unreferenced, old-enough blobs. Marks are run-scoped,
//! so runs are re-entrant: a crash mid-run strands a GcRun row without a
//! `completed_at` and nothing else.

use crate::core::{ArtifactError, Digest, GcMode, GcRunId, LifecycleConfig, Result, TenantId, VersionState};
use crate::object::{ObjectBackend, ObjectError};
use crate::store::{GcRunRow, MetadataStore, StoreState};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct GcParams {
    pub tenant_id: TenantId,
    pub initiated_by: String,
    pub mode: GcMode,
    pub retention_grace_hours: Option<i64>,
    pub batch_size: Option<i64>,
}

pub struct GcEngine {
    store: MetadataStore,
    objects: Arc<dyn ObjectBackend>,
    config: LifecycleConfig,
}

impl GcEngine {
    pub fn new(store: MetadataStore, objects: Arc<dyn ObjectBackend>, config: LifecycleConfig) -> Self {
        Self { store, objects, config }
    }

    pub async fn run(&self, params: GcParams, now: DateTime<Utc>) -> Result<GcRunRow> {
        let grace_hours = params
            .retention_grace_hours
            .filter(|h| (0..=8760).contains(h))
            .map(|h| h as u32)
            .unwrap_or(self.config.gc_retention_grace_hours);
        let batch_size = params
            .batch_size
            .filter(|b| (1..=5000).contains(b))
            .map(|b| b as u32)
            .unwrap_or(self.config.gc_batch_size);
        let cutoff = now - Duration::hours(grace_hours as i64);
        let run_id = GcRunId::new();

        // Open the run. A crash from here on leaves the row without a
        // completed_at for the stranded-run finalizer to pick up.
        let mut txn = self.store.begin().await;
        txn.insert_gc_run(GcRunRow {
            run_id,
            tenant_id: params.tenant_id,
            initiated_by: params.initiated_by.clone(),
            mode: params.mode,
            retention_grace_hours: grace_hours,
            batch_size,
            started_at: now,
            completed_at: None,
            marked: 0,
            candidate_blobs: 0,
            deleted_blobs: 0,
            deleted_versions: 0,
            delete_errors: 0,
        })?;
        txn.record_audit(
            params.tenant_id,
            &params.initiated_by,
            "gc.run.started",
            "gc_run",
            run_id,
            json!({ "mode": params.mode.as_str(), "grace_hours": grace_hours, "batch_size": batch_size }),
            now,
        );
        txn.commit().await;

        // Mark phase: persist the reachable digest set and the candidate
        // counts. This is the whole run in dry-run mode.
        let mut txn = self.store.begin().await;
        let reachable = reachable_digests(&txn, cutoff);
        for digest in &reachable {
            txn.add_gc_mark(run_id, digest.clone(), now);
        }
        let candidate_blobs = sweep_candidates(&txn, &reachable, cutoff).len() as u64;
        let marked = reachable.len() as u64;
        txn.update_gc_run(run_id, |run| {
            run.marked = marked;
            run.candidate_blobs = candidate_blobs;
        })?;
        txn.commit().await;

        if params.mode == GcMode::Execute {
            self.delete_expired_versions(run_id, cutoff, batch_size as usize).await?;
            self.sweep_blobs(run_id, &reachable, cutoff, batch_size as usize).await?;
        }

        let mut txn = self.store.begin().await;
        let finished = txn.update_gc_run(run_id, |run| {
            run.completed_at = Some(now);
        })?;
        txn.record_audit(
            params.tenant_id,
            &params.initiated_by,
            "gc.run.completed",
            "gc_run",
            run_id,
            json!({
                "marked": finished.marked,
                "candidate_blobs": finished.candidate_blobs,
                "deleted_versions": finished.deleted_versions,
                "deleted_blobs": finished.deleted_blobs,
                "delete_errors": finished.delete_errors,
            }),
            now,
        );
        txn.commit().await;

        info!(
            %run_id,
            mode = params.mode.as_str(),
            marked = finished.marked,
            deleted_versions = finished.deleted_versions,
            deleted_blobs = finished.deleted_blobs,
            "gc run finished"
        );
        Ok(finished)
    }

    /// Hard-deletes tombstoned versions whose retention window has closed.
    async fn delete_expired_versions(
        &self,
        run_id: GcRunId,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<()> {
        loop {
            let mut txn = self.store.begin().await;
            let batch: Vec<_> = txn
                .versions()
                .filter(|v| v.state == VersionState::Tombstoned)
                .filter(|v| {
                    txn.tombstone_for_version(v.version_id)
                        .map(|t| t.retention_until <= cutoff)
                        .unwrap_or(false)
                })
                .map(|v| v.version_id)
                .take(batch_size)
                .collect();
            if batch.is_empty() {
                return Ok(());
            }
            let deleted = batch.len() as u64;
            for version_id in batch {
                txn.delete_version(version_id)?;
            }
            txn.update_gc_run(run_id, |run| {
                run.deleted_versions += deleted;
            })?;
            txn.commit().await;
        }
    }

    /// Deletes unmarked blobs, object first, row second. NotFound from the
    /// backend is fine (the object was already gone); any other backend
    /// error counts against the run and leaves the row in place.
    async fn sweep_blobs(
        &self,
        run_id: GcRunId,
        reachable: &BTreeSet<Digest>,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<()> {
        let mut attempted: BTreeSet<Digest> = BTreeSet::new();
        loop {
            let snapshot = self.store.snapshot().await;
            let batch: Vec<(Digest, String)> = sweep_candidates(&snapshot, reachable, cutoff)
                .into_iter()
                .filter(|(digest, _)| !attempted.contains(digest))
                .take(batch_size)
                .collect();
            if batch.is_empty() {
                return Ok(());
            }

            let mut deletable: Vec<Digest> = Vec::new();
            let mut errors: u64 = 0;
            for (digest, storage_key) in batch {
                attempted.insert(digest.clone());
                match self.objects.delete_object(&storage_key).await {
                    Ok(()) | Err(ObjectError::NotFound(_)) => deletable.push(digest),
                    Err(err) => {
                        warn!(%digest, error = %err, "object delete failed during sweep");
                        errors += 1;
                    }
                }
            }

            let mut txn = self.store.begin().await;
            let mut deleted: u64 = 0;
            for digest in &deletable {
                match txn.delete_blob(digest) {
                    Ok(_) => deleted += 1,
                    Err(ArtifactError::NotFound(_)) => {}
                    Err(err) => return Err(err),
                }
            }
            txn.update_gc_run(run_id, |run| {
                run.deleted_blobs += deleted;
                run.delete_errors += errors;
            })?;
            txn.commit().await;
        }
    }

    /// Marks runs that never finalized (crash mid-run) as completed, with
    /// the error counter bumped so the stranding is visible.
    pub async fn finalize_stranded(&self, stranded_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let mut txn = self.store.begin().await;
        let stranded = txn.stranded_gc_runs(stranded_before);
        for run in &stranded {
            txn.update_gc_run(run.run_id, |r| {
                r.completed_at = Some(now);
                r.delete_errors += 1;
            })?;
        }
        let count = stranded.len();
        if count > 0 {
            txn.commit().await;
            warn!(count, "stranded gc runs finalized");
        }
        Ok(count)
    }
}

/// The reachable digest set: everything referenced by a published version
/// or by a tombstoned version still inside its retention window (plus
/// grace).
fn reachable_digests(state: &StoreState, cutoff: DateTime<Utc>) -> BTreeSet<Digest> {
    let mut reachable = BTreeSet::new();
    for version in state.versions() {
        let keep = match version.state {
            VersionState::Published => true,
            VersionState::Tombstoned => state
                .tombstone_for_version(version.version_id)
                // A tombstoned version without its tombstone row is
                // treated as retained; deletion needs positive evidence.
                .map(|t| t.retention_until > cutoff)
                .unwrap_or(true),
            VersionState::Draft => false,
        };
        if !keep {
            continue;
        }
        for entry in state.entries_for_version(version.version_id) {
            reachable.insert(entry.blob_digest.clone());
        }
        if let Some(manifest) = state.manifest(version.version_id) {
            if let Some(digest) = &manifest.manifest_blob_digest {
                reachable.insert(digest.clone());
            }
        }
    }
    reachable
}

/// True when the version is tombstoned and past retention plus grace, i.e.
/// scheduled for hard deletion this run.
fn version_expired(state: &StoreState, version_id: crate::core::VersionId, cutoff: DateTime<Utc>) -> bool {
    match state.version(version_id) {
        Some(version) if version.state == VersionState::Tombstoned => state
            .tombstone_for_version(version_id)
            .map(|t| t.retention_until <= cutoff)
            .unwrap_or(false),
        _ => false,
    }
}

/// True when a surviving version still references the digest through an
/// artifact entry or manifest row. Drafts pin their blobs this way even
/// though the mark phase skips them.
fn blob_pinned(state: &StoreState, digest: &Digest, cutoff: DateTime<Utc>) -> bool {
    state
        .artifact_entries()
        .filter(|entry| &entry.blob_digest == digest)
        .any(|entry| !version_expired(state, entry.version_id, cutoff))
        || state
            .manifests()
            .filter(|m| m.manifest_blob_digest.as_ref() == Some(digest))
            .any(|m| !version_expired(state, m.version_id, cutoff))
}

/// Blobs eligible for the sweep: unmarked, older than the grace cutoff, and
/// not pinned by any surviving version. Computed this way the mark-phase
/// candidate count matches what an execute run would reclaim.
fn sweep_candidates(
    state: &StoreState,
    reachable: &BTreeSet<Digest>,
    cutoff: DateTime<Utc>,
) -> Vec<(Digest, String)> {
    state
        .blobs()
        .filter(|blob| !reachable.contains(&blob.digest))
        .filter(|blob| blob.created_at < cutoff)
        .filter(|blob| !blob_pinned(state, &blob.digest, cutoff))
        .map(|blob| (blob.digest.clone(), blob.storage_key.clone()))
        .collect()
}
