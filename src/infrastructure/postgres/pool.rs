//! PostgreSQL connection pool with circuit breaker integration.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::resilience::{CallError, CircuitBreaker, CircuitState};

/// Errors that can occur with the PostgreSQL pool.
#[derive(Debug, Error)]
pub enum PostgresPoolError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Circuit breaker is open")]
    CircuitOpen,
}

/// PostgreSQL connection pool with circuit breaker integration.
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,

    circuit_breaker: Arc<CircuitBreaker>,

    /// Database URL (for logging purposes)
    database_url: String,
}

impl PostgresPool {
    /// Create a new PostgreSQL pool from configuration.
    pub async fn new(
        config: &DatabaseConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, PostgresPoolError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds as u64))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds as u64))
            .connect(&config.url)
            .await?;

        let pool = Self {
            pool,
            circuit_breaker,
            database_url: config.url.clone(),
        };

        tracing::info!(
            pool_size = config.pool_size,
            url = %pool.database_url_masked(),
            "PostgreSQL connection pool created"
        );

        Ok(pool)
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    /// Execute an operation with circuit breaker protection.
    pub async fn execute_with_circuit_breaker<T, F, Fut>(
        &self,
        operation: F,
    ) -> Result<T, PostgresPoolError>
    where
        F: FnOnce(PgPool) -> Fut,
        Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        let pool = self.pool.clone();
        self.circuit_breaker
            .call(|| operation(pool))
            .await
            .map_err(|e| match e {
                CallError::Rejected => PostgresPoolError::CircuitOpen,
                CallError::Inner(e) => PostgresPoolError::Sqlx(e),
            })
    }

    /// Get the database URL with the password masked.
    pub fn database_url_masked(&self) -> String {
        mask_database_url(&self.database_url)
    }

    /// Close the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL connection pool closed");
    }
}

fn mask_database_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // "postgres://host" has its only colon in the scheme
            if !url[colon_pos..].starts_with("://") {
                return format!("{}***{}", &url[..colon_pos + 1], &url[at_pos..]);
            }
        }
    }
    url.to_string()
}
