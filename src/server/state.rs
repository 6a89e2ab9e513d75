use std::sync::Arc;
use std::time::Instant;

use crate::commit_log::{create_commit_log, CommitLog};
use crate::config::Settings;
use crate::dispatch::{create_sender, NotificationSender};
use crate::error::Result;
use crate::escalation::{create_escalator, Escalator};
use crate::gateway::{create_gateway, GuardedGateway, PushGateway};
use crate::postgres::PostgresPool;
use crate::redis::RedisPool;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};
use crate::retry::{create_retry_store, PostgresRetryStore, RetryStore};
use crate::worker::WorkerContext;

/// Everything the ops listener and background tasks share.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub sender: Arc<dyn NotificationSender>,
    pub gateway: Arc<GuardedGateway>,
    pub commit_log: Arc<dyn CommitLog>,
    pub retry_store: Arc<dyn RetryStore>,
    pub escalator: Arc<Escalator>,
    pub postgres_pool: Option<Arc<PostgresPool>>,
    pub redis_pool: Option<Arc<RedisPool>>,
    pub start_time: Instant,
}

impl AppState {
    /// Build pools and components for the configured backends.
    pub async fn new(settings: Settings) -> Result<Self> {
        let redis_pool = if settings.log.backend == "redis" {
            Some(Arc::new(RedisPool::new(&settings.redis)?))
        } else {
            None
        };

        let postgres_pool = if settings.retry.backend == "postgres" {
            let circuit_breaker = Arc::new(CircuitBreaker::with_config(
                "postgres",
                CircuitBreakerConfig::default(),
            ));
            let pool = Arc::new(PostgresPool::new(&settings.database, circuit_breaker).await?);
            PostgresRetryStore::new(pool.clone()).ensure_schema().await?;
            Some(pool)
        } else {
            None
        };

        Self::from_parts(settings, redis_pool, postgres_pool)
    }

    /// Assemble state from already-built pools; no I/O.
    pub fn from_parts(
        settings: Settings,
        redis_pool: Option<Arc<RedisPool>>,
        postgres_pool: Option<Arc<PostgresPool>>,
    ) -> Result<Self> {
        let gateway = create_gateway(&settings.gateway);
        let escalator = create_escalator(&settings.escalation);
        let retry_store = create_retry_store(&settings.retry, postgres_pool.clone());
        let commit_log = create_commit_log(&settings.log, redis_pool.clone())?;
        let sender = create_sender(
            &settings,
            Some(commit_log.producer()),
            gateway.clone() as Arc<dyn PushGateway>,
        );

        tracing::info!(
            strategy = %sender.strategy(),
            log_backend = commit_log.backend_type(),
            retry_backend = retry_store.backend_type(),
            gateway = gateway.name(),
            escalation = escalator.notifier_name(),
            "Application state initialized"
        );

        Ok(Self {
            settings: Arc::new(settings),
            sender,
            gateway,
            commit_log,
            retry_store,
            escalator,
            postgres_pool,
            redis_pool,
            start_time: Instant::now(),
        })
    }

    /// Collaborators handed to the delivery workers.
    pub fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            gateway: self.gateway.clone(),
            retry_store: self.retry_store.clone(),
            escalator: self.escalator.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchStrategy;

    #[tokio::test]
    async fn test_default_state_uses_in_process_backends() {
        let state = AppState::from_parts(Settings::default(), None, None).unwrap();
        assert_eq!(state.commit_log.backend_type(), "memory");
        assert_eq!(state.retry_store.backend_type(), "memory");
        assert_eq!(state.gateway.name(), "log");
        assert_eq!(state.sender.strategy(), DispatchStrategy::Queued);
        assert!(state.postgres_pool.is_none());
    }
}
