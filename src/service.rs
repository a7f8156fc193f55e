//! The service facade: one handle wiring the store, the object backend,
//! and every engine together. The web layer and the tests drive this; the
//! binary builds one from configuration and mounts the router over it.

use crate::core::{ArtifortressConfig, RepoId, RepoType, Result, TenantId};
use crate::lifecycle::{GcEngine, TombstoneService};
use crate::object::{MemoryObjectStore, ObjectBackend};
use crate::outbox::OutboxDispatcher;
use crate::policy::{PolicyEvaluator, PolicyService, QuarantineService};
use crate::publish::PublishEngine;
use crate::reconcile::Reconciler;
use crate::search::SearchWorker;
use crate::store::{MetadataStore, RepositoryRow, TenantRow};
use crate::upload::UploadSessionManager;
use crate::worker::Sweeper;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub struct ArtifactService {
    pub store: MetadataStore,
    pub objects: Arc<dyn ObjectBackend>,
    pub config: ArtifortressConfig,
    pub uploads: UploadSessionManager,
    pub publisher: PublishEngine,
    pub tombstones: TombstoneService,
    pub gc: GcEngine,
    pub outbox: OutboxDispatcher,
    pub search: SearchWorker,
    pub policy: Arc<PolicyService>,
    pub quarantine: QuarantineService,
    pub reconciler: Reconciler,
}

impl ArtifactService {
    /// Builds a service over the in-memory object backend and no policy
    /// evaluator.
    pub fn new(config: ArtifortressConfig) -> Self {
        Self::with_parts(config, Arc::new(MemoryObjectStore::new()), None)
    }

    pub fn with_parts(
        config: ArtifortressConfig,
        objects: Arc<dyn ObjectBackend>,
        evaluator: Option<Arc<dyn PolicyEvaluator>>,
    ) -> Self {
        let store = MetadataStore::new();
        let policy = Arc::new(PolicyService::new(
            store.clone(),
            evaluator,
            config.policy.clone(),
        ));
        Self {
            uploads: UploadSessionManager::new(
                store.clone(),
                objects.clone(),
                config.upload.clone(),
            ),
            publisher: PublishEngine::new(store.clone(), policy.clone()),
            tombstones: TombstoneService::new(store.clone(), config.lifecycle.clone()),
            gc: GcEngine::new(store.clone(), objects.clone(), config.lifecycle.clone()),
            outbox: OutboxDispatcher::new(store.clone(), config.worker.clone()),
            search: SearchWorker::new(store.clone(), config.worker.clone()),
            policy,
            quarantine: QuarantineService::new(store.clone()),
            reconciler: Reconciler::new(store.clone()),
            store,
            objects,
            config,
        }
    }

    /// Spawns the background sweepers: upload expiry, outbox dispatch, and
    /// search indexing. The returned handles stop their tasks on drop.
    pub fn spawn_sweepers(self: &Arc<Self>) -> Vec<Sweeper> {
        let interval = Duration::from_secs(self.config.worker.poll_seconds);

        let uploads = Arc::clone(self);
        let outbox = Arc::clone(self);
        let search = Arc::clone(self);

        vec![
            Sweeper::spawn("upload-expiry", interval, move || {
                let service = Arc::clone(&uploads);
                async move { service.uploads.sweep_expired(Utc::now()).await.map(|_| ()) }
            }),
            Sweeper::spawn("outbox-dispatch", interval, move || {
                let service = Arc::clone(&outbox);
                async move { service.outbox.sweep(Utc::now()).await.map(|_| ()) }
            }),
            Sweeper::spawn("search-index", interval, move || {
                let service = Arc::clone(&search);
                async move { service.search.sweep(Utc::now()).await.map(|_| ()) }
            }),
        ]
    }

    // ------------------------------------------------------------------
    // Tenancy seeding. Repository CRUD proper lives outside the core;
    // these store-level helpers are what that surface (and the tests)
    // call through.
    // ------------------------------------------------------------------

    pub async fn create_tenant(
        &self,
        slug: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<TenantRow> {
        let row = TenantRow {
            tenant_id: TenantId::new(),
            slug: slug.to_string(),
            name: name.to_string(),
            created_at: now,
        };
        let mut txn = self.store.begin().await;
        txn.insert_tenant(row.clone())?;
        txn.commit().await;
        Ok(row)
    }

    pub async fn create_repository(
        &self,
        tenant_id: TenantId,
        repo_key: &str,
        repo_type: RepoType,
        now: DateTime<Utc>,
    ) -> Result<RepositoryRow> {
        let row = RepositoryRow {
            repo_id: RepoId::new(),
            tenant_id,
            repo_key: repo_key.to_string(),
            repo_type,
            config: serde_json::Value::Null,
            created_at: now,
        };
        let mut txn = self.store.begin().await;
        txn.insert_repository(row.clone())?;
        txn.commit().await;
        Ok(row)
    }
}
