//! Search-index worker and read model.
//!
//! Jobs arrive from the outbox dispatcher keyed (tenant, version). Each
//! claim reads the published version joined with its repo, package, and
//! manifest, derives the searchable text, and upserts the document. The
//! read model is rebuildable: dropping every document and replaying the
//! jobs reproduces it.
//!
//! Failures retry with bounded exponential backoff; a job that exhausts its
//! attempts simply stops matching the claim query.

use crate::core::{
    ArtifactError, Result, SearchJobStatus, TenantId, VersionId, VersionState, WorkerConfig,
};
use crate::store::{MetadataStore, SearchDocumentRow, SearchIndexJobRow, StoreState};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use tracing::debug;

const BACKOFF_BASE_SECONDS: i64 = 30;
const BACKOFF_MAX_EXPONENT: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchSweepReport {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct SearchWorker {
    store: MetadataStore,
    config: WorkerConfig,
}

impl SearchWorker {
    pub fn new(store: MetadataStore, config: WorkerConfig) -> Self {
        Self { store, config }
    }

    /// One sweep: claim a batch of jobs, process each to completion or
    /// failure. Per-job errors never abort the sweep.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SearchSweepReport> {
        let claimed = self.claim_batch(now).await?;
        let mut report = SearchSweepReport {
            claimed: claimed.len(),
            ..SearchSweepReport::default()
        };

        for job in claimed {
            match self.process(&job, now).await? {
                true => report.completed += 1,
                false => report.failed += 1,
            }
        }

        if report.claimed > 0 {
            debug!(?report, "search sweep finished");
        }
        Ok(report)
    }

    async fn claim_batch(&self, now: DateTime<Utc>) -> Result<Vec<SearchIndexJobRow>> {
        let mut txn = self.store.begin().await;
        let batch = txn.claimable_search_jobs(
            now,
            self.config.search_max_attempts,
            self.config.batch_size as usize,
        );
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let mut claimed = Vec::with_capacity(batch.len());
        for job in batch {
            let row = txn.update_search_job(job.job_id, |j| {
                j.status = SearchJobStatus::Processing;
                j.updated_at = now;
            })?;
            claimed.push(row);
        }
        txn.commit().await;
        Ok(claimed)
    }

    /// Indexes one job. Returns true on completion, false on a recorded
    /// failure.
    async fn process(&self, job: &SearchIndexJobRow, now: DateTime<Utc>) -> Result<bool> {
        let mut txn = self.store.begin().await;

        let source = read_source(&txn, job.tenant_id, job.version_id);
        match source {
            None => {
                let attempts = job.attempts + 1;
                txn.update_search_job(job.job_id, |j| {
                    j.status = SearchJobStatus::Failed;
                    j.attempts = attempts;
                    j.available_at = now + backoff(attempts);
                    j.last_error = Some("version_not_published".to_string());
                    j.updated_at = now;
                })?;
                txn.commit().await;
                Ok(false)
            }
            Some(document) => {
                let document = SearchDocumentRow {
                    indexed_at: now,
                    updated_at: now,
                    ..document
                };
                txn.upsert_search_document(document);
                txn.update_search_job(job.job_id, |j| {
                    j.status = SearchJobStatus::Completed;
                    j.last_error = None;
                    j.updated_at = now;
                })?;
                txn.commit().await;
                Ok(true)
            }
        }
    }

    pub async fn document(
        &self,
        tenant_id: TenantId,
        version_id: VersionId,
    ) -> Result<SearchDocumentRow> {
        self.store
            .snapshot()
            .await
            .search_document(tenant_id, version_id)
            .cloned()
            .ok_or_else(|| {
                ArtifactError::not_found(format!("search document for version {version_id}"))
            })
    }

    /// Unranked token-match listing: documents whose term vector contains
    /// every query token. Ordering follows `indexed_at`.
    pub async fn find(&self, tenant_id: TenantId, query: &str) -> Vec<SearchDocumentRow> {
        let tokens: Vec<String> = tokenize(query);
        let snapshot = self.store.snapshot().await;
        let mut matches: Vec<SearchDocumentRow> = snapshot
            .search_documents()
            .filter(|doc| doc.tenant_id == tenant_id)
            .filter(|doc| {
                tokens
                    .iter()
                    .all(|token| doc.search_terms.binary_search(token).is_ok())
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.indexed_at.cmp(&b.indexed_at));
        matches
    }
}

/// Reads the indexable source: the published version joined with repo,
/// package, and manifest. `None` when the version is missing or not
/// published.
fn read_source(
    state: &StoreState,
    tenant_id: TenantId,
    version_id: VersionId,
) -> Option<SearchDocumentRow> {
    let version = state.version(version_id)?;
    if version.state != VersionState::Published {
        return None;
    }
    let repo = state.repository(version.repo_id)?;
    let package = state.package(version.package_id)?;
    let manifest = state.manifest(version_id);

    let manifest_json = manifest.map(|m| m.manifest_json.clone());
    let manifest_text = manifest_json
        .as_ref()
        .map(|json| json.to_string())
        .unwrap_or_default();

    let search_text = derive_search_text(&[
        &repo.repo_key,
        &package.package_type,
        package.namespace.as_deref().unwrap_or(""),
        &package.name,
        &version.version,
        &manifest_text,
    ]);
    let search_terms = tokenize(&search_text);

    Some(SearchDocumentRow {
        tenant_id,
        version_id,
        repo_key: repo.repo_key.clone(),
        package_type: package.package_type.clone(),
        namespace: package.namespace.clone(),
        package_name: package.name.clone(),
        version: version.version.clone(),
        manifest_json,
        published_at: version.published_at,
        search_text,
        search_terms,
        indexed_at: version.published_at.unwrap_or(DateTime::UNIX_EPOCH),
        updated_at: version.published_at.unwrap_or(DateTime::UNIX_EPOCH),
    })
}

/// Whitespace-trimmed, blank-skipped, space-separated concatenation.
pub fn derive_search_text(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|field| field.trim())
        .filter(|field| !field.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased whitespace tokens, deduplicated and sorted so lookups can
/// binary-search.
pub fn tokenize(text: &str) -> Vec<String> {
    let set: BTreeSet<String> = text
        .split_whitespace()
        .map(|token| token.to_lowercase())
        .collect();
    set.into_iter().collect()
}

/// `base * 2^min(attempts - 1, max_exponent)`, deterministic, no jitter.
pub fn backoff(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(BACKOFF_MAX_EXPONENT);
    Duration::seconds(BACKOFF_BASE_SECONDS << exponent)
}
