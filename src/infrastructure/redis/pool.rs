//! Redis connection pool backing the Redis Streams commit log.
//!
//! A single multiplexed connection is shared across producers and
//! consumers; every command goes through the circuit breaker.

use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult};
use tokio::sync::RwLock;

use crate::config::RedisConfig;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

/// Error type for Redis pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    /// Circuit breaker is open
    #[error("Circuit breaker is open")]
    CircuitOpen,
}

impl PoolError {
    /// Server reply carrying the given error code (e.g. `BUSYGROUP`).
    pub fn has_code(&self, code: &str) -> bool {
        match self {
            PoolError::Redis(e) => e.code() == Some(code),
            PoolError::CircuitOpen => false,
        }
    }
}

/// Redis connection pool for stream operations.
pub struct RedisPool {
    client: Client,

    /// Multiplexed connection (shared across tasks)
    connection: RwLock<Option<MultiplexedConnection>>,

    circuit_breaker: Arc<CircuitBreaker>,

    url: String,
}

impl RedisPool {
    /// Create a new Redis pool. No connection is made until first use.
    pub fn new(config: &RedisConfig) -> Result<Self, PoolError> {
        let client = Client::open(config.url.as_str())?;
        let circuit_breaker = Arc::new(CircuitBreaker::with_config(
            "redis",
            CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker_failure_threshold,
                success_threshold: config.circuit_breaker_success_threshold,
                reset_timeout_ms: config.circuit_breaker_reset_timeout_ms,
            },
        ));

        Ok(Self {
            client,
            connection: RwLock::new(None),
            circuit_breaker,
            url: config.url.clone(),
        })
    }

    /// Get a connection, establishing one if none exists.
    ///
    /// Returns an error if the circuit breaker is open.
    pub async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        if !self.circuit_breaker.allow_request() {
            return Err(PoolError::CircuitOpen);
        }

        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, PoolError> {
        let mut conn_guard = self.connection.write().await;

        // Another task may have connected while we waited for the lock
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *conn_guard = Some(conn.clone());
                self.circuit_breaker.record_success();
                tracing::info!("Redis pool connection established");
                Ok(conn)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Execute a Redis command with circuit breaker protection.
    ///
    /// Dropped connections are cleared so the next call reconnects.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    let mut conn_guard = self.connection.write().await;
                    *conn_guard = None;
                }
                // Server-side error replies do not say anything about Redis health
                if e.code().is_none() {
                    self.circuit_breaker.record_failure();
                }
                Err(PoolError::Redis(e))
            }
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ping Redis to check connectivity.
    pub async fn ping(&self) -> Result<(), PoolError> {
        self.execute(|mut conn| async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> RedisConfig {
        RedisConfig {
            url: "redis://localhost:6379".to_string(),
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_success_threshold: 2,
            circuit_breaker_reset_timeout_ms: 30_000,
        }
    }

    #[test]
    fn test_pool_creation() {
        let pool = RedisPool::new(&create_test_config()).unwrap();
        assert_eq!(pool.url(), "redis://localhost:6379");
        assert_eq!(pool.circuit_state(), CircuitState::Closed);
    }

    #[test]
    fn test_pool_rejects_invalid_url() {
        let mut config = create_test_config();
        config.url = "not a url".to_string();
        assert!(RedisPool::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_open_circuit_short_circuits_commands() {
        let pool = RedisPool::new(&create_test_config()).unwrap();
        for _ in 0..5 {
            pool.circuit_breaker().record_failure();
        }
        assert_eq!(pool.circuit_state(), CircuitState::Open);

        let result = pool.ping().await;
        assert!(matches!(result, Err(PoolError::CircuitOpen)));
    }

    #[test]
    fn test_pool_error_codes() {
        assert!(!PoolError::CircuitOpen.has_code("BUSYGROUP"));
        assert_eq!(format!("{}", PoolError::CircuitOpen), "Circuit breaker is open");
    }
}
