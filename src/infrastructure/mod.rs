//! Infrastructure layer modules
//!
//! Shared components used by the delivery pipeline:
//! - `config`: Application configuration and settings
//! - `error`: Process-level error type and ops API error mapping
//! - `metrics`: Prometheus metrics helpers
//! - `postgres`: PostgreSQL connection pool (retry store)
//! - `redis`: Redis connection pool (stream commit log)
//! - `resilience`: Circuit breaker and exponential backoff

pub mod config;
pub mod error;
pub mod metrics;
pub mod postgres;
pub mod redis;
pub mod resilience;
