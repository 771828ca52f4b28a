//! Periodic background dump of the store.

use super::{save, PersistenceConfig};
use crate::storage::StorageEngine;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Handle to the running persistence task.
///
/// Dropping the handle also ends the task after one last dump, but only
/// [`shutdown`](Self::shutdown) waits for that dump to finish.
#[derive(Debug)]
pub struct PersistenceSync {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PersistenceSync {
    /// Spawns the task. The first dump happens one interval from now.
    pub fn start(engine: Arc<StorageEngine>, config: PersistenceConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            data = %config.data_path.display(),
            expiry = %config.expiry_path.display(),
            interval_ms = config.interval.as_millis() as u64,
            "Persistence sync started"
        );
        let task = tokio::spawn(sync_loop(engine, config, shutdown_rx));

        Self { shutdown_tx, task }
    }

    /// Signals the task, then waits for its final dump.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Persistence task ended abnormally");
        }
    }
}

async fn sync_loop(
    engine: Arc<StorageEngine>,
    config: PersistenceConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => dump(&engine, &config).await,
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("Persistence sync shutting down, writing final dump");
                    dump(&engine, &config).await;
                    return;
                }
            }
        }
    }
}

async fn dump(engine: &StorageEngine, config: &PersistenceConfig) {
    match save(engine, config).await {
        Ok(keys) => {
            let stats = engine.stats();
            debug!(
                keys,
                get_ops = stats.get_ops,
                set_ops = stats.set_ops,
                expired = stats.expired,
                "Store persisted"
            );
        }
        // Retried on the next tick
        Err(e) => error!(error = %e, "Failed to persist store"),
    }
}
