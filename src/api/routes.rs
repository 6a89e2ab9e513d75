use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::notifications::send_notification;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new().route("/notifications", post(send_notification)),
        )
}
