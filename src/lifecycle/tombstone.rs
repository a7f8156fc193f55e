use crate::core::{ArtifactError, LifecycleConfig, Result, TombstoneId, VersionId, VersionState};
use crate::store::{MetadataStore, PackageVersionRow, TombstoneRow};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::info;

#[derive(Debug, Clone)]
pub struct TombstoneOutcome {
    pub tombstone: TombstoneRow,
    pub version: PackageVersionRow,
    /// False when the version already carried a tombstone and the existing
    /// row was returned.
    pub created: bool,
}

pub struct TombstoneService {
    store: MetadataStore,
    config: LifecycleConfig,
}

impl TombstoneService {
    pub fn new(store: MetadataStore, config: LifecycleConfig) -> Self {
        Self { store, config }
    }

    /// Tombstones a draft or published version. Idempotent per version:
    /// repeated calls return the existing tombstone unchanged.
    pub async fn tombstone(
        &self,
        version_id: VersionId,
        deleted_by: &str,
        reason: Option<String>,
        retention_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<TombstoneOutcome> {
        let mut txn = self.store.begin().await;
        let version = txn
            .version(version_id)
            .cloned()
            .ok_or_else(|| ArtifactError::not_found(format!("package version {version_id}")))?;

        if let Some(existing) = txn.tombstone_for_version(version_id) {
            return Ok(TombstoneOutcome {
                tombstone: existing.clone(),
                version,
                created: false,
            });
        }

        let retention_days = retention_days
            .filter(|days| (1..=3650).contains(days))
            .unwrap_or(self.config.tombstone_retention_days);

        let updated = txn.update_version(version_id, |v| {
            v.state = VersionState::Tombstoned;
            v.tombstoned_at = Some(now);
            v.tombstone_reason = reason.clone();
        })?;

        let row = TombstoneRow {
            tombstone_id: TombstoneId::new(),
            tenant_id: version.tenant_id,
            repo_id: version.repo_id,
            version_id,
            deleted_by: deleted_by.to_string(),
            deleted_at: now,
            retention_until: now + Duration::days(retention_days as i64),
            reason,
        };
        txn.insert_tombstone(row.clone())?;
        txn.record_audit(
            version.tenant_id,
            deleted_by,
            "package.version.tombstoned",
            "package_version",
            version_id,
            json!({
                "retention_until": row.retention_until.to_rfc3339(),
                "reason": row.reason,
            }),
            now,
        );
        txn.commit().await;

        info!(%version_id, deleted_by, "version tombstoned");
        Ok(TombstoneOutcome {
            tombstone: row,
            version: updated,
            created: true,
        })
    }
}
