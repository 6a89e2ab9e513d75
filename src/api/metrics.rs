//! Prometheus metrics endpoint.

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::metrics::{self, GatewayMetrics, RetryStoreMetrics};
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    update_metrics_from_state(&state).await;

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Refresh gauges that are read from state rather than updated inline
async fn update_metrics_from_state(state: &AppState) {
    GatewayMetrics::set_circuit_state(state.gateway.circuit_stats().state.as_gauge());

    match state.retry_store.stats().await {
        Ok(stats) => RetryStoreMetrics::set_backlog(stats.pending, stats.dead_lettered),
        Err(e) => {
            RetryStoreMetrics::record_error("stats");
            tracing::warn!(error = %e, "Could not read retry store stats for metrics");
        }
    }
}
