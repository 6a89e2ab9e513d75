//! Commit log backend factory

use std::sync::Arc;

use crate::config::LogConfig;
use crate::redis::RedisPool;

use super::memory::MemoryCommitLog;
use super::redis_streams::RedisStreamLog;
use super::{CommitLog, LogError};

/// Create a commit log based on configuration.
///
/// - `"kafka"`: Kafka via rdkafka (requires the `kafka` feature)
/// - `"redis"`: Redis Streams if a Redis pool is provided
/// - `"memory"` (default): in-process log
pub fn create_commit_log(
    settings: &LogConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Result<Arc<dyn CommitLog>, LogError> {
    match settings.backend.as_str() {
        "kafka" => create_kafka(settings),
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    backend = "redis",
                    prefix = %settings.redis_prefix,
                    topic = %settings.topic,
                    partitions = settings.partitions,
                    "Creating Redis Streams commit log"
                );
                Ok(Arc::new(RedisStreamLog::new(settings, pool)))
            } else {
                tracing::warn!("Redis commit log requested but no pool provided, falling back to memory");
                Ok(Arc::new(MemoryCommitLog::new(settings)))
            }
        }
        "memory" => {
            tracing::info!(backend = "memory", "Creating in-memory commit log");
            Ok(Arc::new(MemoryCommitLog::new(settings)))
        }
        other => {
            tracing::warn!(backend = %other, "Unknown commit log backend, using memory");
            Ok(Arc::new(MemoryCommitLog::new(settings)))
        }
    }
}

#[cfg(feature = "kafka")]
fn create_kafka(settings: &LogConfig) -> Result<Arc<dyn CommitLog>, LogError> {
    tracing::info!(
        backend = "kafka",
        bootstrap_servers = %settings.bootstrap_servers,
        topic = %settings.topic,
        group = %settings.consumer_group,
        "Creating Kafka commit log"
    );
    Ok(Arc::new(super::kafka::KafkaCommitLog::new(settings)?))
}

#[cfg(not(feature = "kafka"))]
fn create_kafka(_settings: &LogConfig) -> Result<Arc<dyn CommitLog>, LogError> {
    Err(LogError::Unavailable(
        "kafka backend requested but the binary was built without the `kafka` feature".into(),
    ))
}
