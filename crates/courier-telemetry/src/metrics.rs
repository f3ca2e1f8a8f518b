//! Prometheus metrics for RPC clients and workers.
//!
//! All metrics follow the naming convention: `courier_<component>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // RPC CLIENT
    // =========================================================================

    /// Requests published by RPC clients
    pub static ref RPC_REQUESTS_SENT: IntCounter = IntCounter::new(
        "courier_rpc_requests_sent_total",
        "Total number of RPC requests published"
    ).expect("metric creation failed");

    /// Responses matched to a pending call, by outcome
    pub static ref RPC_RESPONSES: IntCounterVec = IntCounterVec::new(
        Opts::new("courier_rpc_responses_total", "Total RPC responses matched to a pending call"),
        &["outcome"]  // ok, remote_error, decode_error
    ).expect("metric creation failed");

    /// Replies with no matching pending call
    pub static ref RPC_ORPHAN_RESPONSES: IntCounter = IntCounter::new(
        "courier_rpc_orphan_responses_total",
        "Total replies whose correlation id matched no pending call"
    ).expect("metric creation failed");

    /// Replies without a usable correlation id
    pub static ref RPC_MALFORMED_RESPONSES: IntCounter = IntCounter::new(
        "courier_rpc_malformed_responses_total",
        "Total replies dropped for missing or invalid correlation metadata"
    ).expect("metric creation failed");

    /// Pending calls expired by the request timeout sweep
    pub static ref RPC_TIMEOUTS: IntCounter = IntCounter::new(
        "courier_rpc_timeouts_total",
        "Total pending RPC calls expired before a response arrived"
    ).expect("metric creation failed");

    /// Request to response latency
    pub static ref RPC_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "courier_rpc_round_trip_seconds",
            "Time from request registration to response dispatch"
        ).buckets(exponential_buckets(0.0005, 2.0, 16).expect("valid buckets"))
    ).expect("metric creation failed");

    // =========================================================================
    // WORKERS
    // =========================================================================

    /// Reconnect attempts, by outcome
    pub static ref RECONNECT_ATTEMPTS: IntCounterVec = IntCounterVec::new(
        Opts::new("courier_reconnect_attempts_total", "Total reconnect attempts"),
        &["outcome"]  // success, failure
    ).expect("metric creation failed");

    /// Workers that exhausted their reconnect budget
    pub static ref WORKER_FAILURES: IntCounter = IntCounter::new(
        "courier_worker_failures_total",
        "Total workers that gave up reconnecting"
    ).expect("metric creation failed");
}

/// Handle to the registered metrics.
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
///
/// Fails if called twice in the same process.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(RPC_REQUESTS_SENT.clone()),
        Box::new(RPC_RESPONSES.clone()),
        Box::new(RPC_ORPHAN_RESPONSES.clone()),
        Box::new(RPC_MALFORMED_RESPONSES.clone()),
        Box::new(RPC_TIMEOUTS.clone()),
        Box::new(RPC_LATENCY.clone()),
        Box::new(RECONNECT_ATTEMPTS.clone()),
        Box::new(WORKER_FAILURES.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
