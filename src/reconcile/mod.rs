//! Drift detection between the metadata store and the blob table.
//!
//! Read-only: the scan reports, it never repairs. Three buckets, each with
//! a total count and a bounded sample of identifiers.

use crate::core::{Result, TenantId};
use crate::store::MetadataStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileBucket {
    pub count: u64,
    pub samples: Vec<String>,
}

impl ReconcileBucket {
    fn push(&mut self, id: String, limit: usize) {
        self.count += 1;
        if self.samples.len() < limit {
            self.samples.push(id);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub missing_artifact_blobs: ReconcileBucket,
    pub missing_manifest_blobs: ReconcileBucket,
    pub orphan_blobs: ReconcileBucket,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.missing_artifact_blobs.count == 0
            && self.missing_manifest_blobs.count == 0
            && self.orphan_blobs.count == 0
    }
}

pub struct Reconciler {
    store: MetadataStore,
}

impl Reconciler {
    pub fn new(store: MetadataStore) -> Self {
        Self { store }
    }

    pub async fn scan(
        &self,
        tenant_id: TenantId,
        limit: usize,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        let snapshot = self.store.snapshot().await;
        let mut report = ReconcileReport::default();

        for entry in snapshot.artifact_entries() {
            if snapshot.blob(&entry.blob_digest).is_none() {
                report
                    .missing_artifact_blobs
                    .push(entry.entry_id.to_string(), limit);
            }
        }

        for manifest in snapshot.manifests() {
            if let Some(digest) = &manifest.manifest_blob_digest {
                if snapshot.blob(digest).is_none() {
                    report
                        .missing_manifest_blobs
                        .push(manifest.version_id.to_string(), limit);
                }
            }
        }

        for blob in snapshot.blobs() {
            if !snapshot.blob_is_referenced(&blob.digest) {
                report.orphan_blobs.push(blob.digest.to_string(), limit);
            }
        }

        let mut txn = self.store.begin().await;
        txn.record_audit(
            tenant_id,
            actor,
            "reconcile.blobs.checked",
            "blob",
            "all",
            json!({
                "missing_artifact_blobs": report.missing_artifact_blobs.count,
                "missing_manifest_blobs": report.missing_manifest_blobs.count,
                "orphan_blobs": report.orphan_blobs.count,
            }),
            now,
        );
        txn.commit().await;

        Ok(report)
    }
}
