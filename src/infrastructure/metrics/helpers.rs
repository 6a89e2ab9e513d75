//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    DISPATCH_TOTAL, ESCALATIONS_TOTAL, GATEWAY_CIRCUIT_STATE, GATEWAY_LATENCY,
    GATEWAY_REQUESTS_TOTAL, LOG_PUBLISH_LATENCY, RETRY_DEAD_LETTERED, RETRY_PENDING,
    RETRY_STORE_ERRORS_TOTAL, SWEEP_DURATION, SWEEP_RECORDS_TOTAL, SWEEP_RUNS_TOTAL,
    WORKERS_RUNNING, WORKER_COMMIT_FAILURES_TOTAL, WORKER_MESSAGES_TOTAL,
    WORKER_POLL_ERRORS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for dispatch metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    pub fn record_outcome(strategy: &str, outcome: &str) {
        DISPATCH_TOTAL.with_label_values(&[strategy, outcome]).inc();
    }

    pub fn record_publish_latency(backend: &str, latency_secs: f64) {
        LOG_PUBLISH_LATENCY
            .with_label_values(&[backend])
            .observe(latency_secs);
    }
}

/// Helper struct for delivery worker metrics
pub struct WorkerMetrics;

impl WorkerMetrics {
    pub fn record_delivered() {
        WORKER_MESSAGES_TOTAL.with_label_values(&["delivered"]).inc();
    }

    pub fn record_failed() {
        WORKER_MESSAGES_TOTAL.with_label_values(&["failed"]).inc();
    }

    pub fn record_poison() {
        WORKER_MESSAGES_TOTAL.with_label_values(&["poison"]).inc();
    }

    pub fn record_commit_failure() {
        WORKER_COMMIT_FAILURES_TOTAL.inc();
    }

    pub fn record_poll_error() {
        WORKER_POLL_ERRORS_TOTAL.inc();
    }

    pub fn worker_started() {
        WORKERS_RUNNING.inc();
    }

    pub fn worker_stopped() {
        WORKERS_RUNNING.dec();
    }
}

/// Helper struct for push gateway metrics
pub struct GatewayMetrics;

impl GatewayMetrics {
    /// Record one gateway call; `result` is `success` or an error kind
    pub fn record_request(gateway: &str, result: &str, latency_secs: f64) {
        GATEWAY_REQUESTS_TOTAL
            .with_label_values(&[gateway, result])
            .inc();
        GATEWAY_LATENCY
            .with_label_values(&[gateway])
            .observe(latency_secs);
    }

    /// Record a call rejected by the open circuit (no latency sample)
    pub fn record_rejected(gateway: &str) {
        GATEWAY_REQUESTS_TOTAL
            .with_label_values(&[gateway, "circuit_open"])
            .inc();
    }

    pub fn set_circuit_state(state: i64) {
        GATEWAY_CIRCUIT_STATE.set(state);
    }
}

/// Helper struct for retry sweeper metrics
pub struct SweepMetrics;

impl SweepMetrics {
    pub fn record_run(duration_secs: f64) {
        SWEEP_RUNS_TOTAL.inc();
        SWEEP_DURATION.observe(duration_secs);
    }

    pub fn record_resolved(count: u64) {
        SWEEP_RECORDS_TOTAL
            .with_label_values(&["resolved"])
            .inc_by(count);
    }

    pub fn record_failed(count: u64) {
        SWEEP_RECORDS_TOTAL
            .with_label_values(&["failed"])
            .inc_by(count);
    }

    pub fn record_dead_lettered(count: u64) {
        SWEEP_RECORDS_TOTAL
            .with_label_values(&["dead_lettered"])
            .inc_by(count);
    }

    pub fn record_skipped(count: u64) {
        SWEEP_RECORDS_TOTAL
            .with_label_values(&["skipped"])
            .inc_by(count);
    }

    pub fn record_deferred(count: u64) {
        SWEEP_RECORDS_TOTAL
            .with_label_values(&["deferred"])
            .inc_by(count);
    }
}

/// Helper struct for retry store metrics
pub struct RetryStoreMetrics;

impl RetryStoreMetrics {
    pub fn record_error(operation: &str) {
        RETRY_STORE_ERRORS_TOTAL
            .with_label_values(&[operation])
            .inc();
    }

    pub fn set_backlog(pending: u64, dead_lettered: u64) {
        RETRY_PENDING.set(pending as i64);
        RETRY_DEAD_LETTERED.set(dead_lettered as i64);
    }
}

/// Helper struct for escalation metrics
pub struct EscalationMetrics;

impl EscalationMetrics {
    pub fn record_sent(stage: &str) {
        ESCALATIONS_TOTAL.with_label_values(&[stage, "sent"]).inc();
    }

    pub fn record_failed(stage: &str) {
        ESCALATIONS_TOTAL.with_label_values(&[stage, "failed"]).inc();
    }

    pub fn record_timeout(stage: &str) {
        ESCALATIONS_TOTAL.with_label_values(&[stage, "timeout"]).inc();
    }
}
