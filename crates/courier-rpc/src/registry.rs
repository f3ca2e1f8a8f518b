//! Correlation Registry - pending calls keyed by correlation ID.
//!
//! Flow:
//! 1. `RpcClient::send_request` creates a `PendingCall` and calls `put()`
//! 2. The request is published only after `put()` returned
//! 3. The response dispatcher calls `remove()` and completes the call
//! 4. With a request timeout configured, `remove_expired()` fails stale calls
//!
//! One registry per client. Entries without a response and without a timeout
//! stay until the client is dropped.

use crate::correlation::CorrelationId;
use crate::error::{RegistryError, RpcError};
use crate::future::PendingCall;
use courier_telemetry::metrics::RPC_TIMEOUTS;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Statistics for a correlation registry
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Total calls registered
    pub total_registered: AtomicU64,
    /// Total calls removed by a matching response
    pub total_completed: AtomicU64,
    /// Total replies that matched no entry
    pub total_orphaned: AtomicU64,
    /// Total calls failed by the expiry sweep
    pub total_expired: AtomicU64,
    /// Total calls unregistered because their request was never sent
    pub total_withdrawn: AtomicU64,
}

/// Concurrent map of outstanding calls.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    pending: DashMap<CorrelationId, PendingCall>,
    stats: RegistryStats,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call under `id`.
    ///
    /// An id that is already present is rejected and the existing entry kept;
    /// the rejected call is dropped, which abandons its future.
    pub fn put(&self, id: CorrelationId, call: PendingCall) -> Result<(), RegistryError> {
        match self.pending.entry(id) {
            Entry::Occupied(_) => {
                error!(correlation_id = %id, "Correlation id already registered");
                Err(RegistryError::Duplicate(id))
            }
            Entry::Vacant(slot) => {
                slot.insert(call);
                self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
                debug!(correlation_id = %id, "Registered pending call");
                Ok(())
            }
        }
    }

    /// Take the call registered under `id`, if any.
    pub fn remove(&self, id: &CorrelationId) -> Option<PendingCall> {
        let call = self.pending.remove(id).map(|(_, call)| call);
        if call.is_some() {
            self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
        }
        call
    }

    /// Drop the call for a request that never reached the broker.
    ///
    /// Counted as withdrawn, not completed. The call's future resolves as
    /// abandoned if the caller still holds it.
    pub fn withdraw(&self, id: &CorrelationId) -> Option<PendingCall> {
        let call = self.pending.remove(id).map(|(_, call)| call);
        if call.is_some() {
            self.stats.total_withdrawn.fetch_add(1, Ordering::Relaxed);
        }
        call
    }

    pub(crate) fn record_orphan(&self) {
        self.stats.total_orphaned.fetch_add(1, Ordering::Relaxed);
    }

    /// Fail every call whose timeout has passed at `now`.
    ///
    /// Returns the number of calls expired.
    pub fn remove_expired(&self, now: Instant) -> usize {
        let expired: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| *entry.key())
            .collect();

        let mut removed = 0;
        for id in expired {
            // A response may have claimed the call since the scan.
            let Some((_, call)) = self.pending.remove(&id) else {
                continue;
            };
            let after = call.timeout().unwrap_or_default();
            warn!(
                correlation_id = %id,
                elapsed_ms = call.elapsed().as_millis(),
                timeout_ms = after.as_millis(),
                "Expiring pending call"
            );
            call.complete(Err(RpcError::Timeout { id, after }));
            self.stats.total_expired.fetch_add(1, Ordering::Relaxed);
            RPC_TIMEOUTS.inc();
            removed += 1;
        }
        removed
    }

    /// Get number of currently pending calls
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }
}

/// Background task expiring stale calls until the registry is dropped.
pub async fn sweep_expired(registry: Weak<CorrelationRegistry>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(registry) = registry.upgrade() else {
            break;
        };
        let removed = registry.remove_expired(Instant::now());
        if removed > 0 {
            debug!(removed = removed, "Expired stale pending calls");
        }
    }
    debug!("Registry dropped, stopping expiry sweep");
}

/// Spawn [`sweep_expired`] for `registry`.
pub(crate) fn spawn_sweeper(
    registry: &Arc<CorrelationRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(sweep_expired(Arc::downgrade(registry), interval))
}
