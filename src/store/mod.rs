//! The Metadata Store: the sole source of truth.
//!
//! Tables are immutable `im` maps, so a transaction is a private copy of the
//! whole state. Writers serialize through one async mutex; `commit` swaps
//! the working copy in, dropping the transaction rolls it back. Readers take
//! O(1) snapshots of the committed state and never block writers.
//!
//! The single-writer discipline is what row-level `FOR UPDATE` locks and
//! `SKIP LOCKED` claims compile down to in-process: a claim query sees the
//! latest committed rows and its visibility-window updates commit before any
//! other writer runs.

pub mod guard;
pub mod rows;
pub mod state;

pub use rows::*;
pub use state::StoreState;

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Clone, Default)]
pub struct MetadataStore {
    committed: Arc<RwLock<StoreState>>,
    write_serial: Arc<Mutex<()>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A point-in-time snapshot of the committed state.
    pub async fn snapshot(&self) -> StoreState {
        self.committed.read().await.clone()
    }

    /// Begins a write transaction. The returned handle holds the writer
    /// slot until committed or dropped.
    pub async fn begin(&self) -> WriteTxn {
        let serial = self.write_serial.clone().lock_owned().await;
        let working = self.committed.read().await.clone();
        WriteTxn {
            _serial: serial,
            committed: self.committed.clone(),
            working,
        }
    }
}

/// An in-flight write transaction. Dereferences to [`StoreState`], so every
/// table mutator and reader is available on it directly.
pub struct WriteTxn {
    _serial: OwnedMutexGuard<()>,
    committed: Arc<RwLock<StoreState>>,
    working: StoreState,
}

impl WriteTxn {
    /// Atomically publishes every change made through this transaction.
    pub async fn commit(self) {
        *self.committed.write().await = self.working;
    }
}

impl Deref for WriteTxn {
    type Target = StoreState;

    fn deref(&self) -> &StoreState {
        &self.working
    }
}

impl DerefMut for WriteTxn {
    fn deref_mut(&mut self) -> &mut StoreState {
        &mut self.working
    }
}
