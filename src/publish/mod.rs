//! Draft assembly and the atomic publish transaction.
//!
//! A version is assembled while `draft`: artifact entries and a manifest
//! accumulate against it. Publish checks every precondition under the
//! writer, then flips the state, appends the audit record, and emits the
//! `version.published` outbox event — one transaction, all or nothing.
//! Re-publishing an already-published version is a structured no-op.

use crate::core::{
    ArtifactError, ConflictCode, Digest, EntryId, EventId, PackageId, PolicyAction,
    PolicyDecision, QuarantineStatus, RepoId, Result, TenantId, VersionId, VersionState,
};
use crate::policy::{record_decision, PolicyInput, PolicyService};
use crate::store::{
    ArtifactEntryRow, ManifestRow, MetadataStore, OutboxEventRow, PackageRow, PackageVersionRow,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value as Json};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct CreateDraft {
    pub tenant_id: TenantId,
    pub repo_id: RepoId,
    pub package_type: String,
    pub namespace: Option<String>,
    pub name: String,
    pub version: String,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct AddEntry {
    pub relative_path: String,
    pub blob_digest: String,
    pub checksum_sha1: Option<String>,
    pub checksum_sha256: Option<String>,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    #[serde(skip)]
    pub version: PackageVersionRow,
    pub state: VersionState,
    pub idempotent: bool,
    pub event_emitted: bool,
}

pub struct PublishEngine {
    store: MetadataStore,
    policy: Arc<PolicyService>,
}

impl PublishEngine {
    pub fn new(store: MetadataStore, policy: Arc<PolicyService>) -> Self {
        Self { store, policy }
    }

    /// Creates a draft version, creating its package row on first use.
    pub async fn create_draft(&self, req: CreateDraft, now: DateTime<Utc>) -> Result<PackageVersionRow> {
        if req.name.trim().is_empty() {
            return Err(ArtifactError::validation("package name must not be blank"));
        }
        if req.version.trim().is_empty() {
            return Err(ArtifactError::validation("version must not be blank"));
        }

        let mut txn = self.store.begin().await;
        if txn.repository(req.repo_id).is_none() {
            return Err(ArtifactError::not_found(format!("repository {}", req.repo_id)));
        }

        let package_id = match txn.package_by_coords(
            req.repo_id,
            &req.package_type,
            req.namespace.as_deref(),
            &req.name,
        ) {
            Some(package) => package.package_id,
            None => {
                let package = PackageRow {
                    package_id: PackageId::new(),
                    tenant_id: req.tenant_id,
                    repo_id: req.repo_id,
                    package_type: req.package_type.clone(),
                    namespace: req.namespace.clone(),
                    name: req.name.clone(),
                    created_at: now,
                };
                let id = package.package_id;
                txn.insert_package(package)?;
                id
            }
        };

        let row = PackageVersionRow {
            version_id: VersionId::new(),
            tenant_id: req.tenant_id,
            repo_id: req.repo_id,
            package_id,
            version: req.version.clone(),
            state: VersionState::Draft,
            published_at: None,
            created_by: req.created_by.clone(),
            created_at: now,
            tombstoned_at: None,
            tombstone_reason: None,
        };
        txn.insert_version(row.clone())?;
        txn.commit().await;
        Ok(row)
    }

    /// Records one artifact entry against a draft version.
    pub async fn add_entry(&self, version_id: VersionId, req: AddEntry) -> Result<ArtifactEntryRow> {
        let digest = Digest::parse(&req.blob_digest)?;
        if req.size_bytes <= 0 {
            return Err(ArtifactError::validation("size_bytes must be positive"));
        }
        if req.relative_path.trim().is_empty() {
            return Err(ArtifactError::validation("relative_path must not be blank"));
        }

        let mut txn = self.store.begin().await;
        let version = require_version(&txn, version_id)?;
        require_draft(&version, "artifact entries")?;

        let row = ArtifactEntryRow {
            entry_id: EntryId::new(),
            version_id,
            relative_path: req.relative_path,
            blob_digest: digest,
            checksum_sha1: req.checksum_sha1,
            checksum_sha256: req.checksum_sha256,
            size_bytes: req.size_bytes as u64,
        };
        txn.insert_artifact_entry(row.clone())?;
        txn.commit().await;
        Ok(row)
    }

    /// Creates or replaces the manifest of a draft version.
    pub async fn put_manifest(
        &self,
        version_id: VersionId,
        manifest_json: Json,
        manifest_blob_digest: Option<String>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<ManifestRow> {
        let manifest_blob_digest = manifest_blob_digest
            .map(|raw| Digest::parse(&raw))
            .transpose()?;

        let mut txn = self.store.begin().await;
        let version = require_version(&txn, version_id)?;
        require_draft(&version, "manifest writes")?;

        let package_type = txn
            .package(version.package_id)
            .map(|p| p.package_type.clone())
            .unwrap_or_default();
        let existing = txn.manifest(version_id).cloned();
        let row = ManifestRow {
            version_id,
            manifest_json,
            manifest_blob_digest,
            package_type,
            created_by: existing
                .as_ref()
                .map(|m| m.created_by.clone())
                .unwrap_or_else(|| actor.to_string()),
            updated_by: actor.to_string(),
            created_at: existing.as_ref().map(|m| m.created_at).unwrap_or(now),
            updated_at: now,
        };
        txn.upsert_manifest(row.clone())?;
        txn.commit().await;
        Ok(row)
    }

    pub async fn get_manifest(&self, version_id: VersionId) -> Result<ManifestRow> {
        self.store
            .snapshot()
            .await
            .manifest(version_id)
            .cloned()
            .ok_or_else(|| ArtifactError::not_found(format!("manifest for version {version_id}")))
    }

    pub async fn get_version(&self, version_id: VersionId) -> Result<PackageVersionRow> {
        self.store
            .snapshot()
            .await
            .version(version_id)
            .cloned()
            .ok_or_else(|| ArtifactError::not_found(format!("package version {version_id}")))
    }

    /// The atomic publish transaction.
    pub async fn publish(
        &self,
        version_id: VersionId,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome> {
        let version = self.get_version(version_id).await?;
        if version.state == VersionState::Published {
            return Ok(idempotent_outcome(version));
        }

        let input = PolicyInput {
            tenant_id: version.tenant_id,
            repo_id: version.repo_id,
            version_id,
            action: PolicyAction::Publish,
        };
        // Fail-closed: a timed-out evaluator aborts here with nothing
        // persisted.
        let verdict = self.policy.decide(&input).await?;

        let mut txn = self.store.begin().await;
        let version = require_version(&txn, version_id)?;

        match version.state {
            VersionState::Published => {
                drop(txn);
                return Ok(idempotent_outcome(version));
            }
            VersionState::Tombstoned => {
                return Err(ArtifactError::conflict(
                    ConflictCode::PublishPreconditionsUnmet,
                    "version is tombstoned",
                ));
            }
            VersionState::Draft => {}
        }

        match verdict.decision {
            PolicyDecision::Allow => {
                if self.policy.has_evaluator() {
                    record_decision(&mut txn, &version, PolicyAction::Publish, &verdict, actor, now)?;
                }
            }
            PolicyDecision::Deny => {
                record_decision(&mut txn, &version, PolicyAction::Publish, &verdict, actor, now)?;
                txn.commit().await;
                return Err(ArtifactError::conflict(
                    ConflictCode::PublishDenied,
                    verdict.reason.unwrap_or_else(|| "denied by policy".to_string()),
                ));
            }
            PolicyDecision::Quarantine => {
                record_decision(&mut txn, &version, PolicyAction::Publish, &verdict, actor, now)?;
                txn.commit().await;
                return Err(ArtifactError::conflict(
                    ConflictCode::PublishBlockedQuarantine,
                    "version was quarantined by policy",
                ));
            }
        }

        let entries = txn.entries_for_version(version_id);
        if entries.is_empty() {
            return Err(ArtifactError::conflict(
                ConflictCode::PublishPreconditionsUnmet,
                "version has no artifact entries",
            ));
        }
        let manifest = txn.manifest(version_id).cloned().ok_or_else(|| {
            ArtifactError::conflict(ConflictCode::PublishPreconditionsUnmet, "version has no manifest")
        })?;

        let mut referenced: Vec<Digest> = entries.iter().map(|e| e.blob_digest.clone()).collect();
        if let Some(digest) = &manifest.manifest_blob_digest {
            referenced.push(digest.clone());
        }
        for digest in &referenced {
            if txn.blob(digest).is_none() {
                return Err(ArtifactError::conflict(
                    ConflictCode::PublishBlobMissing,
                    format!("referenced blob {digest} does not exist"),
                ));
            }
        }

        if let Some(item) =
            txn.quarantine_for_version(version.tenant_id, version.repo_id, version_id)
        {
            if item.status == QuarantineStatus::Quarantined {
                return Err(ArtifactError::conflict(
                    ConflictCode::PublishBlockedQuarantine,
                    "version is quarantined",
                ));
            }
        }

        let published = txn.update_version(version_id, |v| {
            v.state = VersionState::Published;
            v.published_at = Some(now);
        })?;
        txn.record_audit(
            version.tenant_id,
            actor,
            "package.version.published",
            "package_version",
            version_id,
            json!({ "version": published.version }),
            now,
        );

        let aggregate_id = version_id.to_string();
        let event_emitted =
            if txn.outbox_event_exists("package_version", &aggregate_id, "version.published") {
                false
            } else {
                txn.append_outbox(OutboxEventRow {
                    event_id: EventId::new(),
                    tenant_id: version.tenant_id,
                    aggregate_type: "package_version".to_string(),
                    aggregate_id,
                    event_type: "version.published".to_string(),
                    payload: json!({ "versionId": version_id.to_string() }),
                    occurred_at: now,
                    available_at: now,
                    delivered_at: None,
                    delivery_attempts: 0,
                });
                true
            };
        txn.commit().await;

        info!(%version_id, actor, "version published");
        Ok(PublishOutcome {
            state: published.state,
            version: published,
            idempotent: false,
            event_emitted,
        })
    }

}

fn idempotent_outcome(version: PackageVersionRow) -> PublishOutcome {
    PublishOutcome {
        state: version.state,
        version,
        idempotent: true,
        event_emitted: false,
    }
}

fn require_version(
    state: &crate::store::StoreState,
    version_id: VersionId,
) -> Result<PackageVersionRow> {
    state
        .version(version_id)
        .cloned()
        .ok_or_else(|| ArtifactError::not_found(format!("package version {version_id}")))
}

fn require_draft(version: &PackageVersionRow, what: &str) -> Result<()> {
    if version.state != VersionState::Draft {
        return Err(ArtifactError::conflict(
            ConflictCode::DraftOnly,
            format!(
                "{what} are only legal while the version is draft, state is '{}'",
                version.state.as_str()
            ),
        ));
    }
    Ok(())
}
