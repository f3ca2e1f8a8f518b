//! Bounded reconnect loop driven by connection shutdown signals.
//!
//! # States
//!
//! ```text
//!                 shutdown signal
//!      ┌──────────┐ ──────────────► ┌──────────────┐  budget spent  ┌──────────┐
//!      │   IDLE   │                 │ RECONNECTING │ ─────────────► │ GAVE UP  │
//!      └──────────┘ ◄────────────── └──────────────┘                └──────────┘
//!            ▲          success                                          │
//!            └───────────────────────── reset() ─────────────────────────┘
//! ```
//!
//! A signal for a different connection arriving mid-loop (the fresh
//! connection dropping while it is being set up) is held as pending. If the
//! attempt then reports success, the loop starts over with a fresh budget
//! instead of going idle. Repeats for the connection that started the loop,
//! signals after giving up, and application-initiated closes are ignored.

use crate::policy::ReconnectPolicy;
use async_trait::async_trait;
use courier_telemetry::metrics::{RECONNECT_ATTEMPTS, WORKER_FAILURES};
use courier_transport::{ConnectionId, ShutdownListener, ShutdownSignal, TransportError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Reconnector state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    /// Waiting for a shutdown signal
    Idle,
    /// Retry loop running
    Reconnecting,
    /// Budget exhausted; only `reset()` leaves this state
    GaveUp,
}

impl fmt::Display for ReconnectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectState::Idle => write!(f, "idle"),
            ReconnectState::Reconnecting => write!(f, "reconnecting"),
            ReconnectState::GaveUp => write!(f, "gave-up"),
        }
    }
}

/// What to run on each reconnect attempt.
#[async_trait]
pub trait ReconnectHandler: Send + Sync + 'static {
    /// One attempt. `Ok` ends the retry loop.
    async fn reconnect(&self) -> Result<(), TransportError>;

    /// Called once per accepted shutdown signal, before the first attempt.
    fn connection_lost(&self, _signal: &ShutdownSignal) {}

    /// Called after the last failed attempt.
    fn gave_up(&self, _attempts: u32) {}
}

struct Cell {
    state: ReconnectState,
    /// Connection whose loss started the running loop
    trigger: Option<ConnectionId>,
    /// Loss of another connection seen while the loop was running
    pending: Option<ShutdownSignal>,
}

impl Cell {
    fn idle() -> Self {
        Self {
            state: ReconnectState::Idle,
            trigger: None,
            pending: None,
        }
    }

    fn settle(&mut self, state: ReconnectState) {
        self.state = state;
        self.trigger = None;
        self.pending = None;
    }
}

struct ReconnectorInner {
    handler: Arc<dyn ReconnectHandler>,
    policy: ReconnectPolicy,
    cell: Mutex<Cell>,
    total_attempts: AtomicU64,
    runtime: Option<Handle>,
}

/// Shutdown listener that retries `ReconnectHandler::reconnect`.
#[derive(Clone)]
pub struct Reconnector {
    inner: Arc<ReconnectorInner>,
}

impl Reconnector {
    /// Create a reconnector. Retry loops run on the Tokio runtime current at
    /// construction, or at signal time when constructed outside one.
    pub fn new(handler: Arc<dyn ReconnectHandler>, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(ReconnectorInner {
                handler,
                policy,
                cell: Mutex::new(Cell::idle()),
                total_attempts: AtomicU64::new(0),
                runtime: Handle::try_current().ok(),
            }),
        }
    }

    pub fn state(&self) -> ReconnectState {
        self.inner.cell.lock().state
    }

    /// Attempts made over the reconnector's lifetime.
    pub fn total_attempts(&self) -> u64 {
        self.inner.total_attempts.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }

    /// Leave `GaveUp` so later signals are acted on again.
    pub fn reset(&self) {
        let mut cell = self.inner.cell.lock();
        if cell.state == ReconnectState::GaveUp {
            info!("Reconnector reset");
            cell.settle(ReconnectState::Idle);
        }
    }
}

impl ShutdownListener for Reconnector {
    fn shutdown_completed(&self, signal: ShutdownSignal) {
        let connection = signal.connection_id;
        if signal.initiated_by_application {
            debug!(%connection, "Connection closed by application, not reconnecting");
            return;
        }

        {
            let mut cell = self.inner.cell.lock();
            match cell.state {
                ReconnectState::GaveUp => {
                    debug!(%connection, "Reconnector gave up, ignoring shutdown");
                    return;
                }
                ReconnectState::Reconnecting if cell.trigger == Some(connection) => {
                    debug!(%connection, "Reconnect already running");
                    return;
                }
                ReconnectState::Reconnecting => {
                    debug!(%connection, "Connection lost during reconnect, rearming");
                    cell.pending = Some(signal);
                    return;
                }
                ReconnectState::Idle => {
                    cell.state = ReconnectState::Reconnecting;
                    cell.trigger = Some(connection);
                }
            }
        }

        let Some(runtime) = self
            .inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
        else {
            error!(%connection, "No async runtime available, cannot reconnect");
            self.inner.cell.lock().settle(ReconnectState::Idle);
            return;
        };

        warn!(
            connection = %signal.connection_id,
            reason = %signal.reason,
            max_attempts = self.inner.policy.max_attempts,
            "Connection lost, reconnecting"
        );
        self.inner.handler.connection_lost(&signal);
        runtime.spawn(retry_loop(self.inner.clone()));
    }
}

async fn retry_loop(inner: Arc<ReconnectorInner>) {
    let max_attempts = inner.policy.max_attempts;

    'budget: loop {
        for attempt in 1..=max_attempts {
            tokio::time::sleep(inner.policy.backoff(attempt)).await;
            inner.cell.lock().pending = None;
            inner.total_attempts.fetch_add(1, Ordering::SeqCst);

            match inner.handler.reconnect().await {
                Ok(()) => {
                    RECONNECT_ATTEMPTS.with_label_values(&["success"]).inc();
                    let lost = {
                        let mut cell = inner.cell.lock();
                        match cell.pending.take() {
                            Some(lost) => {
                                cell.trigger = Some(lost.connection_id);
                                Some(lost)
                            }
                            None => {
                                cell.settle(ReconnectState::Idle);
                                None
                            }
                        }
                    };
                    match lost {
                        Some(lost) => {
                            warn!(
                                connection = %lost.connection_id,
                                reason = %lost.reason,
                                "Reconnected connection lost during setup, starting over"
                            );
                            inner.handler.connection_lost(&lost);
                            continue 'budget;
                        }
                        None => {
                            info!(attempt = attempt, "Reconnected");
                            return;
                        }
                    }
                }
                Err(e) => {
                    RECONNECT_ATTEMPTS.with_label_values(&["failure"]).inc();
                    warn!(
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error = %e,
                        "Reconnect attempt failed"
                    );
                }
            }
        }

        inner.cell.lock().settle(ReconnectState::GaveUp);
        WORKER_FAILURES.inc();
        error!(attempts = max_attempts, "Giving up reconnecting");
        inner.handler.gave_up(max_attempts);
        return;
    }
}
