//! RPC client configuration with validation.

use crate::error::RpcError;
use courier_transport::QueueOptions;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// How a reply with a non-OK status reaches the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Every reply resolves successfully; the caller inspects the status.
    Raw,
    /// Non-OK replies resolve as [`RpcError::Remote`].
    #[default]
    Exception,
}

impl ResponseMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raw" | "json" => Some(ResponseMode::Raw),
            "exception" | "error" => Some(ResponseMode::Exception),
            _ => None,
        }
    }
}

/// RPC client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Fixed for the lifetime of the client
    pub response_mode: ResponseMode,
    /// Expire pending calls after this long; `None` keeps them until answered
    pub request_timeout: Option<Duration>,
    /// How often the expiry sweep runs when a timeout is set
    pub sweep_interval: Duration,
    /// Declaration options for the private reply queue
    pub reply_queue: QueueOptions,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            response_mode: ResponseMode::Exception,
            request_timeout: None,
            sweep_interval: Duration::from_secs(1),
            reply_queue: QueueOptions::reply_queue(),
        }
    }
}

impl RpcConfig {
    /// Raw-mode configuration.
    pub fn raw() -> Self {
        Self {
            response_mode: ResponseMode::Raw,
            ..Self::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Create configuration from environment variables.
    ///
    /// - `COURIER_RPC_RESPONSE_MODE`: `raw` or `exception` (default: exception)
    /// - `COURIER_RPC_TIMEOUT_MS`: request timeout in ms (default: none)
    /// - `COURIER_RPC_SWEEP_INTERVAL_MS`: expiry sweep interval (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            response_mode: env::var("COURIER_RPC_RESPONSE_MODE")
                .ok()
                .and_then(|v| ResponseMode::parse(&v))
                .unwrap_or(defaults.response_mode),

            request_timeout: env::var("COURIER_RPC_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis),

            sweep_interval: env::var("COURIER_RPC_SWEEP_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),

            reply_queue: defaults.reply_queue,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), RpcError> {
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(RpcError::Config("request_timeout cannot be 0".into()));
        }

        if self.request_timeout.is_some() && self.sweep_interval.is_zero() {
            return Err(RpcError::Config(
                "sweep_interval cannot be 0 when request_timeout is set".into(),
            ));
        }

        Ok(())
    }
}
