//! Prometheus metrics for the push delivery service.
//!
//! - Dispatch metrics (queued publishes, direct sends, skipped requests)
//! - Delivery worker metrics (outcomes, commit failures, poll errors)
//! - Push gateway metrics (requests by result, latency, circuit state)
//! - Retry sweeper and retry store metrics
//! - Escalation metrics

mod helpers;

pub use helpers::{
    encode_metrics, DispatchMetrics, EscalationMetrics, GatewayMetrics, RetryStoreMetrics,
    SweepMetrics, WorkerMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "push";

lazy_static! {
    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Dispatch calls by strategy and outcome
    pub static ref DISPATCH_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dispatch_total", METRIC_PREFIX),
        "Notification dispatch calls by strategy and outcome",
        &["strategy", "outcome"]
    ).unwrap();

    /// Commit log publish latency
    pub static ref LOG_PUBLISH_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_log_publish_latency_seconds", METRIC_PREFIX),
        "Commit log publish latency until broker acknowledgment",
        &["backend"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // ============================================================================
    // Delivery Worker Metrics
    // ============================================================================

    /// Records processed by the delivery worker, by outcome
    pub static ref WORKER_MESSAGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_worker_messages_total", METRIC_PREFIX),
        "Commit log records processed by the delivery worker",
        &["outcome"]
    ).unwrap();

    /// Offset commits that failed
    pub static ref WORKER_COMMIT_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_worker_commit_failures_total", METRIC_PREFIX),
        "Offset commits rejected by the commit log"
    ).unwrap();

    /// Poll errors returned by the commit log
    pub static ref WORKER_POLL_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_worker_poll_errors_total", METRIC_PREFIX),
        "Errors while polling the commit log"
    ).unwrap();

    /// Running delivery worker instances
    pub static ref WORKERS_RUNNING: IntGauge = register_int_gauge!(
        format!("{}_workers_running", METRIC_PREFIX),
        "Delivery worker instances currently consuming"
    ).unwrap();

    // ============================================================================
    // Push Gateway Metrics
    // ============================================================================

    /// Gateway calls by gateway kind and result
    pub static ref GATEWAY_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_gateway_requests_total", METRIC_PREFIX),
        "Push gateway calls by result",
        &["gateway", "result"]
    ).unwrap();

    /// Gateway call latency
    pub static ref GATEWAY_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_gateway_latency_seconds", METRIC_PREFIX),
        "Push gateway call latency in seconds",
        &["gateway"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Gateway circuit breaker state (0=closed, 1=open, 2=half-open)
    pub static ref GATEWAY_CIRCUIT_STATE: IntGauge = register_int_gauge!(
        format!("{}_gateway_circuit_state", METRIC_PREFIX),
        "Push gateway circuit breaker state (0=closed, 1=open, 2=half-open)"
    ).unwrap();

    // ============================================================================
    // Retry Sweeper / Store Metrics
    // ============================================================================

    /// Completed sweep runs
    pub static ref SWEEP_RUNS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_sweep_runs_total", METRIC_PREFIX),
        "Retry sweeps completed"
    ).unwrap();

    /// Sweep duration
    pub static ref SWEEP_DURATION: Histogram = register_histogram!(
        format!("{}_sweep_duration_seconds", METRIC_PREFIX),
        "Retry sweep duration in seconds",
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0]
    ).unwrap();

    /// Swept records by outcome
    pub static ref SWEEP_RECORDS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_sweep_records_total", METRIC_PREFIX),
        "Retry store records re-driven by the sweeper, by outcome",
        &["outcome"]
    ).unwrap();

    /// Retry store operations that failed
    pub static ref RETRY_STORE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_retry_store_errors_total", METRIC_PREFIX),
        "Retry store operations that failed",
        &["operation"]
    ).unwrap();

    /// Records awaiting a retry
    pub static ref RETRY_PENDING: IntGauge = register_int_gauge!(
        format!("{}_retry_pending", METRIC_PREFIX),
        "Unresolved retry records still eligible for sweeping"
    ).unwrap();

    /// Records moved to dead-letter
    pub static ref RETRY_DEAD_LETTERED: IntGauge = register_int_gauge!(
        format!("{}_retry_dead_lettered", METRIC_PREFIX),
        "Retry records that exhausted their retries"
    ).unwrap();

    // ============================================================================
    // Escalation Metrics
    // ============================================================================

    /// Escalation alerts by stage and result
    pub static ref ESCALATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_escalations_total", METRIC_PREFIX),
        "Escalation alerts by stage and delivery result",
        &["stage", "result"]
    ).unwrap();
}
