//! Outbox dispatcher.
//!
//! Events are co-committed with business writes; this sweep moves them to
//! their consumer. Claiming pushes `available_at` past a visibility window
//! so a crash between claim and ack releases the row on its own. Delivery
//! of a `version.published` event is an idempotent search-job upsert plus
//! the delivered stamp, in one transaction. Events whose version cannot be
//! resolved are requeued, never delivered.

use crate::core::{Result, TenantId, VersionId, WorkerConfig};
use crate::store::{MetadataStore, OutboxEventRow};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

/// How long a claimed event stays invisible before an unacked claim
/// releases it.
const VISIBILITY_WINDOW_SECONDS: i64 = 30;
/// Requeue delay for malformed or unresolvable events.
const REQUEUE_DELAY_SECONDS: i64 = 300;

pub const PUBLISHED_EVENT_TYPE: &str = "version.published";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub claimed: usize,
    pub enqueued: usize,
    pub requeued: usize,
}

pub struct OutboxDispatcher {
    store: MetadataStore,
    config: WorkerConfig,
}

impl OutboxDispatcher {
    pub fn new(store: MetadataStore, config: WorkerConfig) -> Self {
        Self { store, config }
    }

    /// One sweep: claim a batch, then deliver or requeue each event.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<DispatchReport> {
        let claimed = self.claim_batch(now).await?;
        let mut report = DispatchReport {
            claimed: claimed.len(),
            ..DispatchReport::default()
        };

        for event in claimed {
            match resolve_version_id(&event) {
                Some(version_id) => {
                    if self.deliver(&event, event.tenant_id, version_id, now).await? {
                        report.enqueued += 1;
                    } else {
                        report.requeued += 1;
                    }
                }
                None => {
                    warn!(event_id = %event.event_id, "outbox event is unresolvable, requeueing");
                    self.requeue(&event, now).await?;
                    report.requeued += 1;
                }
            }
        }

        if report.claimed > 0 {
            debug!(?report, "outbox sweep finished");
        }
        Ok(report)
    }

    /// Claims visible undelivered `version.published` events: bumps the
    /// attempt counter and pushes `available_at` forward, atomically.
    async fn claim_batch(&self, now: DateTime<Utc>) -> Result<Vec<OutboxEventRow>> {
        let mut txn = self.store.begin().await;
        let batch = txn.claimable_outbox(
            PUBLISHED_EVENT_TYPE,
            now,
            self.config.batch_size as usize,
        );
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let mut claimed = Vec::with_capacity(batch.len());
        for event in batch {
            let row = txn.update_outbox(event.event_id, |e| {
                e.delivery_attempts += 1;
                e.available_at = now + Duration::seconds(VISIBILITY_WINDOW_SECONDS);
            })?;
            claimed.push(row);
        }
        txn.commit().await;
        Ok(claimed)
    }

    /// Upserts the search job and stamps the event delivered in one
    /// transaction. Returns false (and requeues) when the version row is
    /// gone.
    async fn deliver(
        &self,
        event: &OutboxEventRow,
        tenant_id: TenantId,
        version_id: VersionId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut txn = self.store.begin().await;
        match txn.upsert_search_job(tenant_id, version_id, now) {
            Ok(_) => {
                txn.update_outbox(event.event_id, |e| {
                    e.delivered_at = Some(now);
                })?;
                txn.commit().await;
                Ok(true)
            }
            Err(err) => {
                warn!(event_id = %event.event_id, %version_id, error = %err, "search job enqueue failed, requeueing");
                drop(txn);
                self.requeue(event, now).await?;
                Ok(false)
            }
        }
    }

    async fn requeue(&self, event: &OutboxEventRow, now: DateTime<Utc>) -> Result<()> {
        let mut txn = self.store.begin().await;
        txn.update_outbox(event.event_id, |e| {
            e.available_at = now + Duration::seconds(REQUEUE_DELAY_SECONDS);
        })?;
        txn.commit().await;
        Ok(())
    }
}

/// The aggregate id is preferred when it parses as a UUID; otherwise the
/// payload's `versionId` string is tried.
fn resolve_version_id(event: &OutboxEventRow) -> Option<VersionId> {
    if let Ok(id) = Uuid::parse_str(&event.aggregate_id) {
        return Some(VersionId::from(id));
    }
    event
        .payload
        .get("versionId")
        .and_then(|v| v.as_str())
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .map(VersionId::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_with(aggregate_id: &str, payload: serde_json::Value) -> OutboxEventRow {
        let now = Utc::now();
        OutboxEventRow {
            event_id: crate::core::EventId::new(),
            tenant_id: TenantId::new(),
            aggregate_type: "package_version".to_string(),
            aggregate_id: aggregate_id.to_string(),
            event_type: PUBLISHED_EVENT_TYPE.to_string(),
            payload,
            occurred_at: now,
            available_at: now,
            delivered_at: None,
            delivery_attempts: 0,
        }
    }

    #[test]
    fn aggregate_id_wins_when_it_is_a_uuid() {
        let id = Uuid::new_v4();
        let event = event_with(&id.to_string(), json!({}));
        assert_eq!(resolve_version_id(&event), Some(VersionId::from(id)));
    }

    #[test]
    fn payload_version_id_is_the_fallback() {
        let id = Uuid::new_v4();
        let event = event_with("not-a-uuid", json!({ "versionId": id.to_string() }));
        assert_eq!(resolve_version_id(&event), Some(VersionId::from(id)));
    }

    #[test]
    fn unresolvable_events_yield_none() {
        let event = event_with("not-a-uuid", json!({}));
        assert_eq!(resolve_version_id(&event), None);
    }
}
