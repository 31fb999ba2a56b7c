//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Cache traffic and dedupe fan-in
//! - Upstream request volume and rate-limit waits
//! - Quote resolutions and retries
//! - Execution outcomes and bridge polling
//! - Order trigger evaluation

use crate::error::EngineResult;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Coordinator metrics
    pub static ref CACHE_HITS: Counter = register_counter!(
        "crossflow_cache_hits_total",
        "Total coordinator cache hits"
    ).unwrap();

    pub static ref CACHE_MISSES: Counter = register_counter!(
        "crossflow_cache_misses_total",
        "Total coordinator cache misses"
    ).unwrap();

    pub static ref DEDUPE_FANIN: Counter = register_counter!(
        "crossflow_dedupe_fanin_total",
        "Callers joined onto an already in-flight request"
    ).unwrap();

    pub static ref UPSTREAM_REQUESTS: Counter = register_counter!(
        "crossflow_upstream_requests_total",
        "Requests actually dispatched to providers"
    ).unwrap();

    pub static ref RATE_LIMIT_WAITS: Counter = register_counter!(
        "crossflow_rate_limit_waits_total",
        "One-second waits spent near the rate-limit ceiling"
    ).unwrap();

    // Resolver metrics
    pub static ref QUOTE_RESOLUTIONS: CounterVec = register_counter_vec!(
        "crossflow_quote_resolutions_total",
        "Quote resolutions by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref QUOTE_RETRIES: Counter = register_counter!(
        "crossflow_quote_retries_total",
        "Quote fetch retries after transient failures"
    ).unwrap();

    // Execution metrics
    pub static ref EXECUTIONS: CounterVec = register_counter_vec!(
        "crossflow_executions_total",
        "Swap/bridge executions by terminal result",
        &["result"]
    ).unwrap();

    pub static ref BRIDGE_POLL_TICKS: Counter = register_counter!(
        "crossflow_bridge_poll_ticks_total",
        "Bridge completion poll ticks"
    ).unwrap();

    pub static ref APPROVAL_TIMEOUTS: Counter = register_counter!(
        "crossflow_approval_timeouts_total",
        "Approval confirmations that timed out and proceeded optimistically"
    ).unwrap();

    // Order metrics
    pub static ref ORDERS_TRIGGERED: CounterVec = register_counter_vec!(
        "crossflow_orders_triggered_total",
        "Orders triggered by sub-condition",
        &["kind"]
    ).unwrap();

    pub static ref ORDERS_EXPIRED: Counter = register_counter!(
        "crossflow_orders_expired_total",
        "Orders expired by the sweep"
    ).unwrap();

    pub static ref ORDER_EVAL_ERRORS: Counter = register_counter!(
        "crossflow_order_eval_errors_total",
        "Per-order evaluation failures"
    ).unwrap();

    pub static ref EVAL_DURATION: Histogram = register_histogram!(
        "crossflow_eval_cycle_duration_seconds",
        "Trigger evaluation cycle duration",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: Counter = register_counter!(
        "crossflow_health_check_success_total",
        "Total successful health checks"
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: Counter = register_counter!(
        "crossflow_health_check_failure_total",
        "Total failed health checks"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> EngineResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::error::EngineError::Config(e.to_string()))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::EngineError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_cache_hit() {
    CACHE_HITS.inc();
}

pub fn record_cache_miss() {
    CACHE_MISSES.inc();
}

pub fn record_dedupe_fanin() {
    DEDUPE_FANIN.inc();
}

pub fn record_upstream_request() {
    UPSTREAM_REQUESTS.inc();
}

pub fn record_rate_limit_wait() {
    RATE_LIMIT_WAITS.inc();
}

pub fn record_quote_resolution(outcome: &str) {
    QUOTE_RESOLUTIONS.with_label_values(&[outcome]).inc();
}

pub fn record_quote_retry() {
    QUOTE_RETRIES.inc();
}

pub fn record_execution(result: &str) {
    EXECUTIONS.with_label_values(&[result]).inc();
}

pub fn record_bridge_poll_tick() {
    BRIDGE_POLL_TICKS.inc();
}

pub fn record_approval_timeout() {
    APPROVAL_TIMEOUTS.inc();
}

pub fn record_order_triggered(kind: &str) {
    ORDERS_TRIGGERED.with_label_values(&[kind]).inc();
}

pub fn record_order_expired() {
    ORDERS_EXPIRED.inc();
}

pub fn record_order_eval_error() {
    ORDER_EVAL_ERRORS.inc();
}

pub fn observe_eval_duration(secs: f64) {
    EVAL_DURATION.observe(secs);
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.inc();
}
