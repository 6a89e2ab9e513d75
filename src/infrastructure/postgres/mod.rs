//! PostgreSQL persistence module.
//!
//! Provides the connection pool used by the PostgreSQL retry store.

pub mod pool;

pub use pool::{PostgresPool, PostgresPoolError};
