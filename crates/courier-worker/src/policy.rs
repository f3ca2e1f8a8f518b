//! Reconnect retry policy.

use crate::error::WorkerError;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Bounded exponential backoff for reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Delay before attempt `attempt` (1-based): `initial * 2^(attempt-1)`,
    /// capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Create policy from environment variables.
    ///
    /// - `COURIER_RECONNECT_MAX_ATTEMPTS` (default: 10)
    /// - `COURIER_RECONNECT_INITIAL_BACKOFF_MS` (default: 100)
    /// - `COURIER_RECONNECT_MAX_BACKOFF_MS` (default: 30000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let millis = |key: &str| {
            env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
        };

        Self {
            max_attempts: env::var("COURIER_RECONNECT_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_attempts),
            initial_backoff: millis("COURIER_RECONNECT_INITIAL_BACKOFF_MS")
                .unwrap_or(defaults.initial_backoff),
            max_backoff: millis("COURIER_RECONNECT_MAX_BACKOFF_MS")
                .unwrap_or(defaults.max_backoff),
        }
    }

    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.max_attempts == 0 {
            return Err(WorkerError::Config("max_attempts cannot be 0".into()));
        }

        if self.initial_backoff > self.max_backoff {
            return Err(WorkerError::Config(
                "initial_backoff cannot exceed max_backoff".into(),
            ));
        }

        Ok(())
    }
}
