//! Opt-in Active Expiry
//!
//! Lazy expiry never reclaims a key that is set with a TTL and then never
//! read again. When that matters, the engine can be built with
//! [`StorageEngine::with_active_expiry`], which records every deadline in an
//! [`ExpiryIndex`] (a min-heap), and an [`ExpirySweeper`] task periodically
//! drains the due part of the heap.
//!
//! ## Stale deadlines
//!
//! The heap is never updated in place. Overwriting a key or removing it
//! lazily leaves its old deadline in the heap; when that deadline comes due
//! the engine compares it with the key's current expiry and skips it if they
//! differ. A key is therefore removed at most once, by whichever path reaches
//! it first.
//!
//! Stale deadlines are not left to pile up: once the heap holds more than
//! twice the deadlines it held after its last rebuild, the engine rebuilds it
//! from the live entries.

use crate::storage::StorageEngine;
use bytes::Bytes;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

/// Heap size below which the index is never rebuilt
const MIN_COMPACT_LEN: usize = 64;

/// Deadlines ordered earliest first.
#[derive(Debug)]
pub struct ExpiryIndex {
    heap: BinaryHeap<Reverse<(Instant, Bytes)>>,
    /// Heap length past which [`needs_compaction`](Self::needs_compaction) is true
    compact_at: usize,
}

impl Default for ExpiryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpiryIndex {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            compact_at: MIN_COMPACT_LEN,
        }
    }

    pub fn push(&mut self, deadline: Instant, key: Bytes) {
        self.heap.push(Reverse((deadline, key)));
    }

    /// Number of recorded deadlines, stale ones included.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// True once the heap has grown to twice its size after the last rebuild.
    pub fn needs_compaction(&self) -> bool {
        self.heap.len() > self.compact_at
    }

    /// Replaces the heap with exactly the given deadlines.
    pub fn rebuild<I>(&mut self, live: I)
    where
        I: IntoIterator<Item = (Instant, Bytes)>,
    {
        self.heap = live.into_iter().map(Reverse).collect();
        self.compact_at = (self.heap.len() * 2).max(MIN_COMPACT_LEN);
    }

    /// Earliest recorded deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Pops every deadline at or before `now`, handing each to `evict`.
    ///
    /// Returns how many calls to `evict` returned `true`.
    pub fn drain_due<F>(&mut self, now: Instant, mut evict: F) -> u64
    where
        F: FnMut(&Bytes, Instant) -> bool,
    {
        let mut evicted = 0;
        while self.next_deadline().is_some_and(|deadline| deadline <= now) {
            if let Some(Reverse((deadline, key))) = self.heap.pop() {
                if evict(&key, deadline) {
                    evicted += 1;
                }
            }
        }
        evicted
    }
}

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Interval between sweeps (default: 100ms)
    pub interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task.
    ///
    /// The engine should have been created with
    /// [`StorageEngine::with_active_expiry`]; otherwise every sweep is a full scan.
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            interval_ms = config.interval.as_millis() as u64,
            "Background expiry sweeper started"
        );
        tokio::spawn(sweeper_loop(engine, config, shutdown_rx));

        Self { shutdown_tx }
    }

    /// Stops the expiry sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let expired = engine.cleanup_expired();
        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = engine.len(),
                "Expired keys cleaned up"
            );
        }
    }
}
