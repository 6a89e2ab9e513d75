//! Durable commit log client.
//!
//! Notifications travel from the queued sender to the delivery worker over
//! a partitioned, append-only log. Records are partitioned by key (the
//! device token), so every notification for one device lands on the same
//! partition and is consumed in append order. Consumers commit progress
//! manually, after processing.
//!
//! Backends:
//! - `kafka`: Apache Kafka via rdkafka (feature `kafka`)
//! - `redis`: Redis Streams, one stream per partition, consumer groups
//! - `memory`: in-process log for development and tests

mod factory;
#[cfg(feature = "kafka")]
mod kafka;
mod memory;
mod redis_streams;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub use factory::create_commit_log;
#[cfg(feature = "kafka")]
pub use kafka::{KafkaCommitLog, KafkaLogConsumer, KafkaLogProducer};
pub use memory::{MemoryCommitLog, MemoryLogConsumer};
pub use redis_streams::{RedisStreamConsumer, RedisStreamLog};

use crate::redis::PoolError;

/// Errors raised by commit log backends.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Publish not acknowledged within {0:?}")]
    PublishTimeout(std::time::Duration),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Offset commit failed: {0}")]
    Commit(String),

    #[error("Redis error: {0}")]
    Redis(#[from] PoolError),

    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Commit log backend unavailable: {0}")]
    Unavailable(String),
}

/// Position of a record within its partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOffset {
    /// Numeric offset (Kafka, memory log)
    Sequence(i64),
    /// Stream entry id (Redis Streams)
    StreamId(String),
}

impl fmt::Display for RecordOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordOffset::Sequence(offset) => write!(f, "{}", offset),
            RecordOffset::StreamId(id) => f.write_str(id),
        }
    }
}

/// A record read from the commit log.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: RecordOffset,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Broker acknowledgment for a published record.
///
/// Backends that do not report placement leave the fields empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishAck {
    pub partition: Option<i32>,
    pub offset: Option<RecordOffset>,
}

/// Identity of one consumer within the configured consumer group.
///
/// Backends without broker-side assignment (memory, Redis Streams) split
/// partitions among members by `partition % count == index`.
#[derive(Debug, Clone)]
pub struct ConsumerMember {
    pub name: String,
    pub index: usize,
    pub count: usize,
}

impl ConsumerMember {
    pub fn new(name: impl Into<String>, index: usize, count: usize) -> Self {
        Self {
            name: name.into(),
            index,
            count: count.max(1),
        }
    }

    /// Single member owning every partition.
    pub fn solo(name: impl Into<String>) -> Self {
        Self::new(name, 0, 1)
    }

    /// Partitions this member reads, out of `partitions` total.
    pub fn assigned_partitions(&self, partitions: u32) -> Vec<i32> {
        (0..partitions as i32)
            .filter(|p| (*p as usize) % self.count == self.index % self.count)
            .collect()
    }
}

/// Appends records to the log.
#[async_trait]
pub trait LogProducer: Send + Sync {
    /// Publish `payload` under `key`; resolves once the broker acknowledged it.
    async fn publish(&self, key: &str, payload: &[u8]) -> Result<PublishAck, LogError>;

    /// Backend type name (for logging/metrics)
    fn backend_type(&self) -> &'static str;
}

/// Reads records of one consumer group member.
#[async_trait]
pub trait LogConsumer: Send {
    /// Next record, or `None` when nothing arrived within the poll timeout.
    async fn poll(&mut self) -> Result<Option<LogRecord>, LogError>;

    /// Mark `record` (and everything before it in its partition) as consumed.
    async fn commit(&mut self, record: &LogRecord) -> Result<(), LogError>;
}

/// A configured log: hands out the shared producer and per-member consumers.
#[async_trait]
pub trait CommitLog: Send + Sync {
    fn producer(&self) -> std::sync::Arc<dyn LogProducer>;

    async fn consumer(&self, member: ConsumerMember) -> Result<Box<dyn LogConsumer>, LogError>;

    fn backend_type(&self) -> &'static str;
}

/// FNV-1a partitioner: stable across processes and restarts.
pub fn partition_for_key(key: &str, partitions: u32) -> i32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let hash = key.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ byte as u32).wrapping_mul(FNV_PRIME)
    });
    (hash % partitions.max(1)) as i32
}
