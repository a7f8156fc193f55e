//! Policy evaluation and quarantine holds.
//!
//! Policy decisions arrive from outside the core: either as an explicit
//! decision in the request or from a wired evaluator. An evaluator that
//! exceeds its budget fails closed — the operation is denied and nothing is
//! persisted. A quarantine decision persists the decision record and the
//! quarantine item in the same transaction.

use crate::core::{
    ArtifactError, ConflictCode, Digest, PolicyAction, PolicyConfig, PolicyDecision, QuarantineId,
    QuarantineStatus, RepoId, Result, TenantId, VersionId,
};
use crate::store::{
    MetadataStore, PackageVersionRow, PolicyEvaluationRow, QuarantineItemRow, StoreState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value as Json};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PolicyInput {
    pub tenant_id: TenantId,
    pub repo_id: RepoId,
    pub version_id: VersionId,
    pub action: PolicyAction,
}

#[derive(Debug, Clone)]
pub struct PolicyVerdict {
    pub decision: PolicyDecision,
    pub reason: Option<String>,
    pub details: Json,
}

impl PolicyVerdict {
    pub fn allow() -> Self {
        Self {
            decision: PolicyDecision::Allow,
            reason: None,
            details: Json::Null,
        }
    }
}

/// External decision point. Implementations run outside the core; the
/// service only sees the verdict.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn evaluate(&self, input: &PolicyInput) -> PolicyVerdict;
}

pub struct PolicyService {
    store: MetadataStore,
    evaluator: Option<Arc<dyn PolicyEvaluator>>,
    config: PolicyConfig,
}

impl PolicyService {
    pub fn new(
        store: MetadataStore,
        evaluator: Option<Arc<dyn PolicyEvaluator>>,
        config: PolicyConfig,
    ) -> Self {
        Self { store, evaluator, config }
    }

    pub fn has_evaluator(&self) -> bool {
        self.evaluator.is_some()
    }

    /// Resolves a verdict without persisting anything. No evaluator wired
    /// means allow; a timed-out evaluator means fail closed.
    pub async fn decide(&self, input: &PolicyInput) -> Result<PolicyVerdict> {
        match &self.evaluator {
            None => Ok(PolicyVerdict::allow()),
            Some(evaluator) => {
                match timeout(self.config.evaluation_timeout(), evaluator.evaluate(input)).await {
                    Ok(verdict) => Ok(verdict),
                    Err(_) => Err(ArtifactError::PolicyTimeout(self.config.evaluation_timeout_ms)),
                }
            }
        }
    }

    /// The evaluation operation: resolve a verdict (explicit decision wins
    /// over the evaluator), persist the decision record, and apply the
    /// quarantine side effect when the decision calls for it.
    pub async fn evaluate_and_record(
        &self,
        version_id: VersionId,
        action: PolicyAction,
        requested: Option<PolicyVerdict>,
        evaluated_by: &str,
        now: DateTime<Utc>,
    ) -> Result<PolicyEvaluationRow> {
        let version = {
            let snapshot = self.store.snapshot().await;
            snapshot
                .version(version_id)
                .cloned()
                .ok_or_else(|| ArtifactError::not_found(format!("package version {version_id}")))?
        };
        let input = PolicyInput {
            tenant_id: version.tenant_id,
            repo_id: version.repo_id,
            version_id,
            action,
        };
        let verdict = match requested {
            Some(verdict) => verdict,
            None => self.decide(&input).await?,
        };

        let mut txn = self.store.begin().await;
        // Re-read under the writer: the version may have been deleted since.
        if txn.version(version_id).is_none() {
            return Err(ArtifactError::not_found(format!("package version {version_id}")));
        }
        let row = record_decision(&mut txn, &version, action, &verdict, evaluated_by, now)?;
        txn.commit().await;
        info!(
            %version_id,
            decision = verdict.decision.as_str(),
            "policy evaluation recorded"
        );
        Ok(row)
    }
}

/// Persists the decision record plus quarantine side effect into an open
/// transaction. Shared by the evaluation endpoint and the publish gate.
pub fn record_decision(
    state: &mut StoreState,
    version: &PackageVersionRow,
    action: PolicyAction,
    verdict: &PolicyVerdict,
    evaluated_by: &str,
    now: DateTime<Utc>,
) -> Result<PolicyEvaluationRow> {
    let row = PolicyEvaluationRow {
        evaluation_id: crate::core::EvaluationId::new(),
        tenant_id: version.tenant_id,
        repo_id: version.repo_id,
        version_id: version.version_id,
        action,
        decision: verdict.decision,
        reason: verdict.reason.clone(),
        details: verdict.details.clone(),
        evaluated_at: now,
        evaluated_by: evaluated_by.to_string(),
    };
    state.append_policy_evaluation(row.clone());
    state.record_audit(
        version.tenant_id,
        evaluated_by,
        "policy.evaluated",
        "package_version",
        version.version_id,
        json!({ "action": action.as_str(), "decision": verdict.decision.as_str() }),
        now,
    );
    if verdict.decision == PolicyDecision::Quarantine {
        let reason = verdict
            .reason
            .clone()
            .unwrap_or_else(|| "policy_quarantine".to_string());
        state.upsert_quarantine_item(
            version.tenant_id,
            version.repo_id,
            version.version_id,
            reason,
            now,
        )?;
        state.record_audit(
            version.tenant_id,
            evaluated_by,
            "quarantine.created",
            "package_version",
            version.version_id,
            json!({ "reason": verdict.reason }),
            now,
        );
    }
    Ok(row)
}

pub struct QuarantineService {
    store: MetadataStore,
}

impl QuarantineService {
    pub fn new(store: MetadataStore) -> Self {
        Self { store }
    }

    pub async fn list_for_repo(
        &self,
        tenant_id: TenantId,
        repo_id: RepoId,
    ) -> Vec<QuarantineItemRow> {
        let snapshot = self.store.snapshot().await;
        let mut items: Vec<QuarantineItemRow> = snapshot
            .quarantine_items()
            .filter(|item| item.tenant_id == tenant_id && item.repo_id == repo_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        items
    }

    pub async fn get(&self, item_id: QuarantineId) -> Result<QuarantineItemRow> {
        self.store
            .snapshot()
            .await
            .quarantine_item(item_id)
            .cloned()
            .ok_or_else(|| ArtifactError::not_found(format!("quarantine item {item_id}")))
    }

    pub async fn release(
        &self,
        item_id: QuarantineId,
        resolved_by: &str,
        now: DateTime<Utc>,
    ) -> Result<QuarantineItemRow> {
        self.resolve(item_id, QuarantineStatus::Released, "quarantine.released", resolved_by, now)
            .await
    }

    pub async fn reject(
        &self,
        item_id: QuarantineId,
        resolved_by: &str,
        now: DateTime<Utc>,
    ) -> Result<QuarantineItemRow> {
        self.resolve(item_id, QuarantineStatus::Rejected, "quarantine.rejected", resolved_by, now)
            .await
    }

    async fn resolve(
        &self,
        item_id: QuarantineId,
        status: QuarantineStatus,
        audit_action: &str,
        resolved_by: &str,
        now: DateTime<Utc>,
    ) -> Result<QuarantineItemRow> {
        let mut txn = self.store.begin().await;
        let item = txn
            .quarantine_item(item_id)
            .cloned()
            .ok_or_else(|| ArtifactError::not_found(format!("quarantine item {item_id}")))?;
        if item.status != QuarantineStatus::Quarantined {
            return Err(ArtifactError::conflict(
                ConflictCode::QuarantineResolved,
                format!("item already resolved as '{}'", item.status.as_str()),
            ));
        }
        let row = txn.update_quarantine_item(item_id, |i| {
            i.status = status;
            i.resolved_by = Some(resolved_by.to_string());
            i.updated_at = now;
        })?;
        txn.record_audit(
            item.tenant_id,
            resolved_by,
            audit_action,
            "quarantine_item",
            item_id,
            json!({ "version_id": item.version_id.to_string() }),
            now,
        );
        txn.commit().await;
        Ok(row)
    }
}

/// The download gate: true when the digest is reachable from any version in
/// the repo whose quarantine item blocks downloads (quarantined or
/// rejected; released items unblock).
pub fn digest_blocked(state: &StoreState, repo_id: RepoId, digest: &Digest) -> bool {
    let mut referencing_versions: Vec<VersionId> = state
        .artifact_entries()
        .filter(|entry| &entry.blob_digest == digest)
        .map(|entry| entry.version_id)
        .collect();
    referencing_versions.extend(
        state
            .manifests()
            .filter(|m| m.manifest_blob_digest.as_ref() == Some(digest))
            .map(|m| m.version_id),
    );

    referencing_versions.into_iter().any(|version_id| {
        state
            .version(version_id)
            .filter(|v| v.repo_id == repo_id)
            .and_then(|v| state.quarantine_for_version(v.tenant_id, repo_id, version_id))
            .map(|item| item.status.blocks_download())
            .unwrap_or(false)
    })
}
