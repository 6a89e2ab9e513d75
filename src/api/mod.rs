//! Ops HTTP surface: health, statistics, Prometheus metrics and a
//! notification trigger.

mod health;
mod metrics;
mod notifications;
mod routes;

pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use notifications::send_notification;
pub use routes::api_routes;
