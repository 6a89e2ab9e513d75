//! Fault-tolerance primitives shared across outbound dependencies.
//!
//! - `CircuitBreaker`: stops hammering a failing dependency (push gateway, Redis, PostgreSQL)
//! - `ExponentialBackoff`: spaces out retries of broker polls and reconnects

mod backoff;
mod circuit_breaker;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use circuit_breaker::{
    CallError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};

/// Current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
