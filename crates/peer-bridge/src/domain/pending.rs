//! Round-trip registry: correlation id to pending waiter.
//!
//! Flow:
//! 1. Dispatcher generates a CorrelationId
//! 2. Dispatcher calls `register()` to get a oneshot receiver
//! 3. Dispatcher sends the envelope to the peer
//! 4. Peer reply arrives and the connection manager calls `settle()`
//! 5. Dispatcher awaits the receiver or times out and calls `abandon()`
//!
//! Removal from the map is the settlement point: whichever of `settle`,
//! `abandon` or `remove_expired` removes the entry first wins, every later
//! attempt finds nothing and is a no-op.

use crate::domain::correlation::CorrelationId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome delivered to the waiting dispatcher.
#[derive(Debug)]
pub struct SettledReply {
    /// Correlation ID this reply is for
    pub correlation_id: CorrelationId,
    /// Peer data on success, peer error text on failure
    pub result: Result<serde_json::Value, String>,
    /// Time between registration and settlement
    pub response_time: Duration,
}

/// Receiving half handed to the dispatcher by `register()`.
pub type Waiter = oneshot::Receiver<SettledReply>;

/// A round trip waiting for its reply
struct PendingEntry {
    /// Channel to deliver the settlement
    sender: oneshot::Sender<SettledReply>,
    /// When the entry was registered
    created_at: Instant,
    /// Operation name (for logging)
    operation: &'static str,
}

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("correlation id already pending: {0}")]
    DuplicateId(CorrelationId),
}

/// Counters for the registry
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Entries registered
    pub total_registered: AtomicU64,
    /// Settled with peer data
    pub total_resolved: AtomicU64,
    /// Settled with a peer-reported failure
    pub total_rejected: AtomicU64,
    /// Removed by timeout, send failure or a dropped caller
    pub total_abandoned: AtomicU64,
    /// Removed by the stale-entry sweep
    pub total_expired: AtomicU64,
    /// Replies for ids that were no longer pending
    pub total_late_replies: AtomicU64,
}

/// Point-in-time copy of [`RegistryStats`] for the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStatsSnapshot {
    pub registered: u64,
    pub resolved: u64,
    pub rejected: u64,
    pub abandoned: u64,
    pub expired: u64,
    pub late_replies: u64,
}

impl RegistryStats {
    pub fn snapshot(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            registered: self.total_registered.load(Ordering::Relaxed),
            resolved: self.total_resolved.load(Ordering::Relaxed),
            rejected: self.total_rejected.load(Ordering::Relaxed),
            abandoned: self.total_abandoned.load(Ordering::Relaxed),
            expired: self.total_expired.load(Ordering::Relaxed),
            late_replies: self.total_late_replies.load(Ordering::Relaxed),
        }
    }
}

/// Mapping from correlation id to pending waiter.
#[derive(Default)]
pub struct RoundTripRegistry {
    /// Map of correlation ID to pending entry
    pending: DashMap<CorrelationId, PendingEntry>,
    /// Statistics
    stats: RegistryStats,
}

impl RoundTripRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending round trip and get the receiver for its settlement.
    ///
    /// Fails if `correlation_id` is already pending; the existing entry is
    /// left untouched.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        operation: &'static str,
    ) -> Result<Waiter, RegistryError> {
        match self.pending.entry(correlation_id) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateId(correlation_id)),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(PendingEntry {
                    sender: tx,
                    created_at: Instant::now(),
                    operation,
                });
                self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

                debug!(
                    correlation_id = %correlation_id,
                    operation = operation,
                    "Registered pending round trip"
                );

                Ok(rx)
            }
        }
    }

    /// Settle a pending round trip with the peer's outcome.
    ///
    /// Returns true if the id was pending (and is now removed), false if it
    /// was unknown, e.g. a reply arriving after the caller timed out.
    pub fn settle(
        &self,
        correlation_id: CorrelationId,
        result: Result<serde_json::Value, String>,
    ) -> bool {
        let Some((_, entry)) = self.pending.remove(&correlation_id) else {
            self.stats.total_late_replies.fetch_add(1, Ordering::Relaxed);
            warn!(
                correlation_id = %correlation_id,
                "Reply for unknown or expired correlation ID"
            );
            return false;
        };

        let response_time = entry.created_at.elapsed();
        if result.is_ok() {
            self.stats.total_resolved.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.total_rejected.fetch_add(1, Ordering::Relaxed);
        }

        let reply = SettledReply {
            correlation_id,
            result,
            response_time,
        };

        if entry.sender.send(reply).is_err() {
            // Caller went away between removal and delivery
            debug!(
                correlation_id = %correlation_id,
                operation = entry.operation,
                "Pending round trip receiver dropped"
            );
        } else {
            debug!(
                correlation_id = %correlation_id,
                operation = entry.operation,
                response_time_ms = response_time.as_millis() as u64,
                "Settled pending round trip"
            );
        }

        true
    }

    /// Remove a pending entry without settling it. Idempotent.
    pub fn abandon(&self, correlation_id: &CorrelationId) -> bool {
        match self.pending.remove(correlation_id) {
            Some((_, entry)) => {
                self.stats.total_abandoned.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    operation = entry.operation,
                    elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
                    "Abandoned pending round trip"
                );
                true
            }
            None => false,
        }
    }

    /// Remove entries older than `max_age`.
    ///
    /// Dropping an entry's sender wakes its waiter with a receive error.
    /// Returns the number of entries removed.
    pub fn remove_expired(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.pending.retain(|id, entry| {
            let elapsed = now.duration_since(entry.created_at);
            if elapsed > max_age {
                warn!(
                    correlation_id = %id,
                    operation = entry.operation,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Removing expired pending round trip"
                );
                removed += 1;
                false
            } else {
                true
            }
        });

        self.stats
            .total_expired
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Number of currently pending round trips
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a correlation ID is pending
    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    /// Get statistics
    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }
}

/// Background task sweeping entries that outlived `max_age`.
pub async fn cleanup_task(registry: Arc<RoundTripRegistry>, interval: Duration, max_age: Duration) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cleanup_interval.tick().await;
        let removed = registry.remove_expired(max_age);
        if removed > 0 {
            debug!(removed = removed, "Cleaned up expired pending round trips");
        }
    }
}
