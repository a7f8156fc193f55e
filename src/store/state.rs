//! The authoritative table set.
//!
//! `StoreState` is a value: every table is an immutable `im` map, so cloning
//! the whole state is O(1) and a write transaction works on a private copy.
//! All mutation goes through the methods here, which enforce the schema
//! constraints (uniqueness, positive lengths, foreign keys, state guards)
//! and surface violations as deterministic errors.

use super::guard;
use super::rows::*;
use crate::core::types::unique_violation;
use crate::core::{
    ArtifactError, ConflictCode, Digest, GcRunId, QuarantineStatus, Result, SearchJobStatus,
    VersionState,
};
use crate::core::{
    AuditId, EntryId, EventId, JobId, PackageId, QuarantineId, RepoId, TenantId, TombstoneId,
    UploadId, VersionId,
};
use chrono::{DateTime, Utc};
use im::{OrdMap, Vector};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct StoreState {
    tenants: OrdMap<TenantId, TenantRow>,
    tenant_slugs: OrdMap<String, TenantId>,

    repositories: OrdMap<RepoId, RepositoryRow>,
    repo_keys: OrdMap<(TenantId, String), RepoId>,

    packages: OrdMap<PackageId, PackageRow>,
    package_coords: OrdMap<(RepoId, String, String, String), PackageId>,

    versions: OrdMap<VersionId, PackageVersionRow>,
    version_coords: OrdMap<(RepoId, PackageId, String), VersionId>,

    blobs: OrdMap<Digest, BlobRow>,
    blob_storage_keys: OrdMap<String, Digest>,

    upload_sessions: OrdMap<UploadId, UploadSessionRow>,

    artifact_entries: OrdMap<EntryId, ArtifactEntryRow>,
    entry_paths: OrdMap<(VersionId, String), EntryId>,

    manifests: OrdMap<VersionId, ManifestRow>,

    audit_log: Vector<AuditLogRow>,

    outbox_events: OrdMap<EventId, OutboxEventRow>,

    search_jobs: OrdMap<JobId, SearchIndexJobRow>,
    search_job_versions: OrdMap<(TenantId, VersionId), JobId>,

    quarantine_items: OrdMap<QuarantineId, QuarantineItemRow>,
    quarantine_versions: OrdMap<(TenantId, RepoId, VersionId), QuarantineId>,

    policy_evaluations: Vector<PolicyEvaluationRow>,

    tombstones: OrdMap<TombstoneId, TombstoneRow>,
    tombstone_versions: OrdMap<VersionId, TombstoneId>,

    gc_runs: OrdMap<GcRunId, GcRunRow>,
    gc_marks: OrdMap<(GcRunId, Digest), DateTime<Utc>>,

    search_documents: OrdMap<(TenantId, VersionId), SearchDocumentRow>,
}

impl StoreState {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Tenants and repositories
    // ------------------------------------------------------------------

    pub fn insert_tenant(&mut self, row: TenantRow) -> Result<()> {
        if self.tenant_slugs.contains_key(&row.slug) {
            return Err(unique_violation(format!("tenant slug '{}'", row.slug)));
        }
        self.tenant_slugs.insert(row.slug.clone(), row.tenant_id);
        self.tenants.insert(row.tenant_id, row);
        Ok(())
    }

    pub fn tenant(&self, id: TenantId) -> Option<&TenantRow> {
        self.tenants.get(&id)
    }

    pub fn tenant_by_slug(&self, slug: &str) -> Option<&TenantRow> {
        self.tenant_slugs.get(slug).and_then(|id| self.tenants.get(id))
    }

    pub fn insert_repository(&mut self, row: RepositoryRow) -> Result<()> {
        self.require_tenant(row.tenant_id)?;
        let key = (row.tenant_id, row.repo_key.clone());
        if self.repo_keys.contains_key(&key) {
            return Err(unique_violation(format!("repo key '{}'", row.repo_key)));
        }
        self.repo_keys.insert(key, row.repo_id);
        self.repositories.insert(row.repo_id, row);
        Ok(())
    }

    pub fn repository(&self, id: RepoId) -> Option<&RepositoryRow> {
        self.repositories.get(&id)
    }

    pub fn repository_by_key(&self, tenant_id: TenantId, repo_key: &str) -> Option<&RepositoryRow> {
        self.repo_keys
            .get(&(tenant_id, repo_key.to_string()))
            .and_then(|id| self.repositories.get(id))
    }

    fn require_tenant(&self, id: TenantId) -> Result<()> {
        if self.tenants.contains_key(&id) {
            Ok(())
        } else {
            Err(ArtifactError::not_found(format!("tenant {id}")))
        }
    }

    fn require_repository(&self, id: RepoId) -> Result<()> {
        if self.repositories.contains_key(&id) {
            Ok(())
        } else {
            Err(ArtifactError::not_found(format!("repository {id}")))
        }
    }

    // ------------------------------------------------------------------
    // Packages and versions
    // ------------------------------------------------------------------

    pub fn insert_package(&mut self, row: PackageRow) -> Result<()> {
        self.require_repository(row.repo_id)?;
        let key = (
            row.repo_id,
            row.package_type.clone(),
            row.namespace_key(),
            row.name.clone(),
        );
        if self.package_coords.contains_key(&key) {
            return Err(unique_violation(format!("package '{}'", row.name)));
        }
        self.package_coords.insert(key, row.package_id);
        self.packages.insert(row.package_id, row);
        Ok(())
    }

    pub fn package(&self, id: PackageId) -> Option<&PackageRow> {
        self.packages.get(&id)
    }

    pub fn package_by_coords(
        &self,
        repo_id: RepoId,
        package_type: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<&PackageRow> {
        let key = (
            repo_id,
            package_type.to_string(),
            namespace.unwrap_or_default().to_string(),
            name.to_string(),
        );
        self.package_coords.get(&key).and_then(|id| self.packages.get(id))
    }

    pub fn insert_version(&mut self, row: PackageVersionRow) -> Result<()> {
        self.require_repository(row.repo_id)?;
        if !self.packages.contains_key(&row.package_id) {
            return Err(ArtifactError::not_found(format!("package {}", row.package_id)));
        }
        check_version_state_columns(&row)?;
        let key = (row.repo_id, row.package_id, row.version.clone());
        if self.version_coords.contains_key(&key) {
            return Err(unique_violation(format!("version '{}'", row.version)));
        }
        self.version_coords.insert(key, row.version_id);
        self.versions.insert(row.version_id, row);
        Ok(())
    }

    pub fn version(&self, id: VersionId) -> Option<&PackageVersionRow> {
        self.versions.get(&id)
    }

    pub fn versions(&self) -> impl Iterator<Item = &PackageVersionRow> {
        self.versions.values()
    }

    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    /// Applies `mutate` to a copy of the row, passes old/new through the
    /// published-immutability guard, then stores the result.
    pub fn update_version(
        &mut self,
        id: VersionId,
        mutate: impl FnOnce(&mut PackageVersionRow),
    ) -> Result<PackageVersionRow> {
        let old = self
            .versions
            .get(&id)
            .cloned()
            .ok_or_else(|| ArtifactError::not_found(format!("package version {id}")))?;
        let mut new = old.clone();
        mutate(&mut new);
        new.version_id = old.version_id;
        check_version_state_columns(&new)?;
        guard::check_version_update(&old, &new)?;
        if new.version != old.version {
            let old_key = (old.repo_id, old.package_id, old.version.clone());
            let new_key = (new.repo_id, new.package_id, new.version.clone());
            if self.version_coords.contains_key(&new_key) {
                return Err(unique_violation(format!("version '{}'", new.version)));
            }
            self.version_coords.remove(&old_key);
            self.version_coords.insert(new_key, id);
        }
        self.versions.insert(id, new.clone());
        Ok(new)
    }

    /// Hard-deletes a version row and everything hanging off it: artifact
    /// entries, manifest, search jobs, quarantine items, tombstone, and the
    /// search document (the read model is rebuildable).
    pub fn delete_version(&mut self, id: VersionId) -> Result<PackageVersionRow> {
        let row = self
            .versions
            .remove(&id)
            .ok_or_else(|| ArtifactError::not_found(format!("package version {id}")))?;
        self.version_coords
            .remove(&(row.repo_id, row.package_id, row.version.clone()));

        let entry_ids: Vec<EntryId> = self
            .artifact_entries
            .values()
            .filter(|e| e.version_id == id)
            .map(|e| e.entry_id)
            .collect();
        for entry_id in entry_ids {
            if let Some(entry) = self.artifact_entries.remove(&entry_id) {
                self.entry_paths.remove(&(id, entry.relative_path));
            }
        }

        self.manifests.remove(&id);

        if let Some(job_id) = self.search_job_versions.remove(&(row.tenant_id, id)) {
            self.search_jobs.remove(&job_id);
        }

        if let Some(item_id) = self
            .quarantine_versions
            .remove(&(row.tenant_id, row.repo_id, id))
        {
            self.quarantine_items.remove(&item_id);
        }

        if let Some(tombstone_id) = self.tombstone_versions.remove(&id) {
            self.tombstones.remove(&tombstone_id);
        }

        self.search_documents.remove(&(row.tenant_id, id));

        Ok(row)
    }

    // ------------------------------------------------------------------
    // Blobs
    // ------------------------------------------------------------------

    /// Content-addressed upsert with `ON CONFLICT (digest) DO NOTHING`
    /// semantics. Returns whether the row was inserted.
    pub fn upsert_blob(&mut self, row: BlobRow) -> Result<bool> {
        if row.length_bytes == 0 {
            return Err(ArtifactError::validation("blob length_bytes must be positive"));
        }
        if self.blobs.contains_key(&row.digest) {
            return Ok(false);
        }
        if self.blob_storage_keys.contains_key(&row.storage_key) {
            return Err(unique_violation(format!("blob storage key '{}'", row.storage_key)));
        }
        self.blob_storage_keys
            .insert(row.storage_key.clone(), row.digest.clone());
        self.blobs.insert(row.digest.clone(), row);
        Ok(true)
    }

    pub fn blob(&self, digest: &Digest) -> Option<&BlobRow> {
        self.blobs.get(digest)
    }

    pub fn blobs(&self) -> impl Iterator<Item = &BlobRow> {
        self.blobs.values()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Deletes a blob row; upload sessions that referenced it get their
    /// back-reference nulled (FK ON DELETE SET NULL).
    pub fn delete_blob(&mut self, digest: &Digest) -> Result<BlobRow> {
        let row = self
            .blobs
            .remove(digest)
            .ok_or_else(|| ArtifactError::not_found(format!("blob {digest}")))?;
        self.blob_storage_keys.remove(&row.storage_key);

        let referencing: Vec<UploadId> = self
            .upload_sessions
            .values()
            .filter(|s| s.committed_blob_digest.as_ref() == Some(digest))
            .map(|s| s.upload_id)
            .collect();
        for upload_id in referencing {
            if let Some(mut session) = self.upload_sessions.get(&upload_id).cloned() {
                session.committed_blob_digest = None;
                self.upload_sessions.insert(upload_id, session);
            }
        }
        Ok(row)
    }

    /// True when any artifact entry or manifest row references the digest;
    /// such blobs are protected from deletion (FK RESTRICT).
    pub fn blob_is_referenced(&self, digest: &Digest) -> bool {
        self.artifact_entries
            .values()
            .any(|e| &e.blob_digest == digest)
            || self
                .manifests
                .values()
                .any(|m| m.manifest_blob_digest.as_ref() == Some(digest))
    }

    // ------------------------------------------------------------------
    // Upload sessions
    // ------------------------------------------------------------------

    pub fn insert_upload_session(&mut self, row: UploadSessionRow) -> Result<()> {
        self.require_tenant(row.tenant_id)?;
        self.require_repository(row.repo_id)?;
        if row.expected_length == 0 {
            return Err(ArtifactError::validation("expected_length must be positive"));
        }
        self.upload_sessions.insert(row.upload_id, row);
        Ok(())
    }

    pub fn upload_session(&self, id: UploadId) -> Option<&UploadSessionRow> {
        self.upload_sessions.get(&id)
    }

    pub fn upload_sessions(&self) -> impl Iterator<Item = &UploadSessionRow> {
        self.upload_sessions.values()
    }

    pub fn update_upload_session(
        &mut self,
        id: UploadId,
        mutate: impl FnOnce(&mut UploadSessionRow),
    ) -> Result<UploadSessionRow> {
        let old = self
            .upload_sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| ArtifactError::not_found(format!("upload session {id}")))?;
        let mut new = old.clone();
        mutate(&mut new);
        new.upload_id = old.upload_id;
        if old.state.is_terminal() && new.state != old.state {
            return Err(ArtifactError::conflict(
                ConflictCode::UploadSessionState,
                format!("session is terminal in state '{}'", old.state.as_str()),
            ));
        }
        self.upload_sessions.insert(id, new.clone());
        Ok(new)
    }

    /// Active sessions whose deadline has passed; the expiry sweeper aborts
    /// these.
    pub fn expired_upload_sessions(&self, now: DateTime<Utc>) -> Vec<UploadSessionRow> {
        self.upload_sessions
            .values()
            .filter(|s| s.state.is_active() && s.expires_at <= now)
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Artifact entries and manifests
    // ------------------------------------------------------------------

    pub fn insert_artifact_entry(&mut self, row: ArtifactEntryRow) -> Result<()> {
        if !self.versions.contains_key(&row.version_id) {
            return Err(ArtifactError::not_found(format!(
                "package version {}",
                row.version_id
            )));
        }
        if row.size_bytes == 0 {
            return Err(ArtifactError::validation("entry size_bytes must be positive"));
        }
        let key = (row.version_id, row.relative_path.clone());
        if self.entry_paths.contains_key(&key) {
            return Err(unique_violation(format!("entry path '{}'", row.relative_path)));
        }
        self.entry_paths.insert(key, row.entry_id);
        self.artifact_entries.insert(row.entry_id, row);
        Ok(())
    }

    pub fn artifact_entries(&self) -> impl Iterator<Item = &ArtifactEntryRow> {
        self.artifact_entries.values()
    }

    pub fn entries_for_version(&self, version_id: VersionId) -> Vec<ArtifactEntryRow> {
        self.artifact_entries
            .values()
            .filter(|e| e.version_id == version_id)
            .cloned()
            .collect()
    }

    pub fn upsert_manifest(&mut self, row: ManifestRow) -> Result<()> {
        if !self.versions.contains_key(&row.version_id) {
            return Err(ArtifactError::not_found(format!(
                "package version {}",
                row.version_id
            )));
        }
        self.manifests.insert(row.version_id, row);
        Ok(())
    }

    pub fn manifest(&self, version_id: VersionId) -> Option<&ManifestRow> {
        self.manifests.get(&version_id)
    }

    pub fn manifests(&self) -> impl Iterator<Item = &ManifestRow> {
        self.manifests.values()
    }

    // ------------------------------------------------------------------
    // Audit log
    // ------------------------------------------------------------------

    pub fn append_audit(&mut self, row: AuditLogRow) {
        self.audit_log.push_back(row);
    }

    /// Convenience constructor for the common append shape.
    pub fn record_audit(
        &mut self,
        tenant_id: TenantId,
        actor: &str,
        action: &str,
        resource_type: &str,
        resource_id: impl ToString,
        details: serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) {
        self.append_audit(AuditLogRow {
            audit_id: AuditId::new(),
            tenant_id,
            actor: actor.to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            details,
            occurred_at,
        });
    }

    pub fn audits(&self) -> impl Iterator<Item = &AuditLogRow> {
        self.audit_log.iter()
    }

    // ------------------------------------------------------------------
    // Outbox
    // ------------------------------------------------------------------

    pub fn append_outbox(&mut self, row: OutboxEventRow) {
        self.outbox_events.insert(row.event_id, row);
    }

    pub fn outbox_event(&self, id: EventId) -> Option<&OutboxEventRow> {
        self.outbox_events.get(&id)
    }

    pub fn outbox_events(&self) -> impl Iterator<Item = &OutboxEventRow> {
        self.outbox_events.values()
    }

    pub fn update_outbox(
        &mut self,
        id: EventId,
        mutate: impl FnOnce(&mut OutboxEventRow),
    ) -> Result<OutboxEventRow> {
        let mut row = self
            .outbox_events
            .get(&id)
            .cloned()
            .ok_or_else(|| ArtifactError::not_found(format!("outbox event {id}")))?;
        mutate(&mut row);
        self.outbox_events.insert(id, row.clone());
        Ok(row)
    }

    /// Undelivered events of the given type that have become visible,
    /// oldest occurrence first.
    pub fn claimable_outbox(
        &self,
        event_type: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Vec<OutboxEventRow> {
        let mut rows: Vec<OutboxEventRow> = self
            .outbox_events
            .values()
            .filter(|e| {
                e.delivered_at.is_none() && e.event_type == event_type && e.available_at <= now
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
        rows.truncate(limit);
        rows
    }

    /// True when an event (delivered or not) already exists for the
    /// aggregate; the publish engine uses this for idempotent re-publish.
    pub fn outbox_event_exists(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        event_type: &str,
    ) -> bool {
        self.outbox_events.values().any(|e| {
            e.aggregate_type == aggregate_type
                && e.aggregate_id == aggregate_id
                && e.event_type == event_type
        })
    }

    // ------------------------------------------------------------------
    // Search index jobs
    // ------------------------------------------------------------------

    /// Idempotent enqueue keyed on (tenant, version): inserts a pending job
    /// or resets the existing one to pending with cleared error state.
    pub fn upsert_search_job(
        &mut self,
        tenant_id: TenantId,
        version_id: VersionId,
        now: DateTime<Utc>,
    ) -> Result<SearchIndexJobRow> {
        if !self.versions.contains_key(&version_id) {
            return Err(ArtifactError::not_found(format!("package version {version_id}")));
        }
        let key = (tenant_id, version_id);
        if let Some(job_id) = self.search_job_versions.get(&key).copied() {
            return self.update_search_job(job_id, |job| {
                job.status = SearchJobStatus::Pending;
                job.attempts = 0;
                job.available_at = now;
                job.last_error = None;
                job.updated_at = now;
            });
        }
        let row = SearchIndexJobRow {
            job_id: JobId::new(),
            tenant_id,
            version_id,
            status: SearchJobStatus::Pending,
            available_at: now,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.search_job_versions.insert(key, row.job_id);
        self.search_jobs.insert(row.job_id, row.clone());
        Ok(row)
    }

    pub fn search_job(&self, id: JobId) -> Option<&SearchIndexJobRow> {
        self.search_jobs.get(&id)
    }

    pub fn search_jobs(&self) -> impl Iterator<Item = &SearchIndexJobRow> {
        self.search_jobs.values()
    }

    pub fn search_job_for_version(
        &self,
        tenant_id: TenantId,
        version_id: VersionId,
    ) -> Option<&SearchIndexJobRow> {
        self.search_job_versions
            .get(&(tenant_id, version_id))
            .and_then(|id| self.search_jobs.get(id))
    }

    pub fn update_search_job(
        &mut self,
        id: JobId,
        mutate: impl FnOnce(&mut SearchIndexJobRow),
    ) -> Result<SearchIndexJobRow> {
        let mut row = self
            .search_jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| ArtifactError::not_found(format!("search job {id}")))?;
        mutate(&mut row);
        self.search_jobs.insert(id, row.clone());
        Ok(row)
    }

    /// Pending or retryable-failed jobs visible at `now`, ordered by
    /// (available_at, created_at). Jobs at the attempt ceiling are excluded:
    /// dead-letter by omission.
    pub fn claimable_search_jobs(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
        limit: usize,
    ) -> Vec<SearchIndexJobRow> {
        let mut rows: Vec<SearchIndexJobRow> = self
            .search_jobs
            .values()
            .filter(|j| {
                matches!(j.status, SearchJobStatus::Pending | SearchJobStatus::Failed)
                    && j.available_at <= now
                    && j.attempts < max_attempts
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.available_at
                .cmp(&b.available_at)
                .then(a.created_at.cmp(&b.created_at))
        });
        rows.truncate(limit);
        rows
    }

    // ------------------------------------------------------------------
    // Quarantine
    // ------------------------------------------------------------------

    /// Upsert keyed on (tenant, repo, version). An existing item is put back
    /// into `quarantined` with the new reason. Returns (row, created).
    pub fn upsert_quarantine_item(
        &mut self,
        tenant_id: TenantId,
        repo_id: RepoId,
        version_id: VersionId,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<(QuarantineItemRow, bool)> {
        if !self.versions.contains_key(&version_id) {
            return Err(ArtifactError::not_found(format!("package version {version_id}")));
        }
        let key = (tenant_id, repo_id, version_id);
        if let Some(item_id) = self.quarantine_versions.get(&key).copied() {
            let row = self.update_quarantine_item(item_id, |item| {
                item.status = QuarantineStatus::Quarantined;
                item.reason = reason;
                item.resolved_by = None;
                item.updated_at = now;
            })?;
            return Ok((row, false));
        }
        let row = QuarantineItemRow {
            item_id: QuarantineId::new(),
            tenant_id,
            repo_id,
            version_id,
            status: QuarantineStatus::Quarantined,
            reason,
            created_at: now,
            updated_at: now,
            resolved_by: None,
        };
        self.quarantine_versions.insert(key, row.item_id);
        self.quarantine_items.insert(row.item_id, row.clone());
        Ok((row, true))
    }

    pub fn quarantine_item(&self, id: QuarantineId) -> Option<&QuarantineItemRow> {
        self.quarantine_items.get(&id)
    }

    pub fn quarantine_items(&self) -> impl Iterator<Item = &QuarantineItemRow> {
        self.quarantine_items.values()
    }

    pub fn quarantine_for_version(
        &self,
        tenant_id: TenantId,
        repo_id: RepoId,
        version_id: VersionId,
    ) -> Option<&QuarantineItemRow> {
        self.quarantine_versions
            .get(&(tenant_id, repo_id, version_id))
            .and_then(|id| self.quarantine_items.get(id))
    }

    pub fn update_quarantine_item(
        &mut self,
        id: QuarantineId,
        mutate: impl FnOnce(&mut QuarantineItemRow),
    ) -> Result<QuarantineItemRow> {
        let mut row = self
            .quarantine_items
            .get(&id)
            .cloned()
            .ok_or_else(|| ArtifactError::not_found(format!("quarantine item {id}")))?;
        mutate(&mut row);
        self.quarantine_items.insert(id, row.clone());
        Ok(row)
    }

    // ------------------------------------------------------------------
    // Policy evaluations
    // ------------------------------------------------------------------

    pub fn append_policy_evaluation(&mut self, row: PolicyEvaluationRow) {
        self.policy_evaluations.push_back(row);
    }

    pub fn policy_evaluations(&self) -> impl Iterator<Item = &PolicyEvaluationRow> {
        self.policy_evaluations.iter()
    }

    // ------------------------------------------------------------------
    // Tombstones
    // ------------------------------------------------------------------

    pub fn insert_tombstone(&mut self, row: TombstoneRow) -> Result<()> {
        if !self.versions.contains_key(&row.version_id) {
            return Err(ArtifactError::not_found(format!(
                "package version {}",
                row.version_id
            )));
        }
        if self.tombstone_versions.contains_key(&row.version_id) {
            return Err(unique_violation(format!(
                "tombstone for version {}",
                row.version_id
            )));
        }
        self.tombstone_versions.insert(row.version_id, row.tombstone_id);
        self.tombstones.insert(row.tombstone_id, row);
        Ok(())
    }

    pub fn tombstone_for_version(&self, version_id: VersionId) -> Option<&TombstoneRow> {
        self.tombstone_versions
            .get(&version_id)
            .and_then(|id| self.tombstones.get(id))
    }

    pub fn tombstones(&self) -> impl Iterator<Item = &TombstoneRow> {
        self.tombstones.values()
    }

    // ------------------------------------------------------------------
    // GC bookkeeping
    // ------------------------------------------------------------------

    pub fn insert_gc_run(&mut self, row: GcRunRow) -> Result<()> {
        if row.batch_size == 0 {
            return Err(ArtifactError::validation("gc batch_size must be positive"));
        }
        self.gc_runs.insert(row.run_id, row);
        Ok(())
    }

    pub fn gc_run(&self, id: GcRunId) -> Option<&GcRunRow> {
        self.gc_runs.get(&id)
    }

    pub fn gc_runs(&self) -> impl Iterator<Item = &GcRunRow> {
        self.gc_runs.values()
    }

    pub fn update_gc_run(
        &mut self,
        id: GcRunId,
        mutate: impl FnOnce(&mut GcRunRow),
    ) -> Result<GcRunRow> {
        let mut row = self
            .gc_runs
            .get(&id)
            .cloned()
            .ok_or_else(|| ArtifactError::not_found(format!("gc run {id}")))?;
        mutate(&mut row);
        self.gc_runs.insert(id, row.clone());
        Ok(row)
    }

    pub fn add_gc_mark(&mut self, run_id: GcRunId, digest: Digest, marked_at: DateTime<Utc>) {
        self.gc_marks.insert((run_id, digest), marked_at);
    }

    pub fn mark_set(&self, run_id: GcRunId) -> BTreeSet<Digest> {
        self.gc_marks
            .keys()
            .filter(|(run, _)| *run == run_id)
            .map(|(_, digest)| digest.clone())
            .collect()
    }

    /// Runs that started before `cutoff` and never finalized.
    pub fn stranded_gc_runs(&self, cutoff: DateTime<Utc>) -> Vec<GcRunRow> {
        self.gc_runs
            .values()
            .filter(|r| r.completed_at.is_none() && r.started_at < cutoff)
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Search documents
    // ------------------------------------------------------------------

    /// Upsert keyed on (tenant, version); `indexed_at` survives updates.
    pub fn upsert_search_document(&mut self, mut row: SearchDocumentRow) {
        let key = (row.tenant_id, row.version_id);
        if let Some(existing) = self.search_documents.get(&key) {
            row.indexed_at = existing.indexed_at;
        }
        self.search_documents.insert(key, row);
    }

    pub fn search_document(
        &self,
        tenant_id: TenantId,
        version_id: VersionId,
    ) -> Option<&SearchDocumentRow> {
        self.search_documents.get(&(tenant_id, version_id))
    }

    pub fn search_documents(&self) -> impl Iterator<Item = &SearchDocumentRow> {
        self.search_documents.values()
    }
}

/// Column-level checks that hold for inserts and updates alike.
fn check_version_state_columns(row: &PackageVersionRow) -> Result<()> {
    match row.state {
        VersionState::Published if row.published_at.is_none() => Err(ArtifactError::conflict(
            ConflictCode::Conflict,
            "published version requires published_at",
        )),
        VersionState::Tombstoned if row.tombstoned_at.is_none() => Err(ArtifactError::conflict(
            ConflictCode::Conflict,
            "tombstoned version requires tombstoned_at",
        )),
        _ => Ok(()),
    }
}
