//! Background Expiry Sweeper
//!
//! This module implements the task that periodically scans a shard for
//! expired entries and removes them. This is "active expiry", as opposed to
//! the "lazy expiry" check that every read performs.
//!
//! ## Why Do We Need This?
//!
//! Lazy expiry hides a dead entry but does not free it. If a key expires and
//! is never read again, it would stay in memory forever.
//!
//! ## Design
//!
//! One sweeper runs per shard, started by [`TtlShard::run`]:
//! 1. Waits for the next tick of a fixed `gc_interval`
//! 2. Scans the whole shard map and removes every dead entry
//! 3. Logs how many entries it removed
//! 4. Exits as soon as the shard's cancellation token fires

use crate::storage::shard::TtlShard;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// The sweeper loop of one shard.
pub(crate) async fn sweep_loop(shard: Arc<TtlShard>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(shard = shard.id(), "Expiry sweeper received shutdown signal");
                return;
            }
            _ = ticker.tick() => {}
        }

        let expired = shard.cleanup_expired();

        if expired > 0 {
            debug!(
                shard = shard.id(),
                expired = expired,
                keys_remaining = shard.len(),
                "Expired keys cleaned up"
            );
        } else {
            trace!(shard = shard.id(), "Sweep found nothing to remove");
        }
    }
}
