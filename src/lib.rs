// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;
pub use infrastructure::postgres;
pub use infrastructure::redis;
pub use infrastructure::resilience;

// Domain layer
pub mod notification;

// Delivery pipeline
pub mod commit_log;
pub mod dispatch;
pub mod escalation;
pub mod gateway;
pub mod retry;
pub mod worker;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod shutdown;
pub mod telemetry;
