//! Periodic sweeper scaffold.
//!
//! A sweeper is a tokio task that alternates between sleeping one poll
//! interval and running a sweep closure. Stopping is cooperative through a
//! oneshot; dropping the handle aborts the task outright.

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::warn;

pub struct Sweeper {
    name: &'static str,
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawns a sweeper that runs `sweep` every `interval`. Sweep errors
    /// are logged and do not stop the loop.
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut sweep: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = crate::core::Result<()>> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let join_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        break;
                    }
                    _ = sleep(interval) => {
                        if let Err(err) = sweep().await {
                            warn!(sweeper = name, error = %err, "sweep failed");
                        }
                    }
                }
            }
        });
        Self {
            name,
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signals the sweeper to stop and waits for the task to finish.
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            let _ = join_handle.await;
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}
