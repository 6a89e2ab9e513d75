//! In-process commit log.
//!
//! Partitioned, append-only and shared between every producer and consumer
//! handed out by one `MemoryCommitLog`. Committed offsets are tracked per
//! consumer group, so a consumer created after a "restart" resumes at the
//! first uncommitted record. Nothing survives the process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::config::LogConfig;

use super::{
    partition_for_key, CommitLog, ConsumerMember, LogConsumer, LogError, LogProducer, LogRecord,
    PublishAck, RecordOffset,
};

#[derive(Debug, Clone)]
struct MemoryEntry {
    key: Option<String>,
    payload: Vec<u8>,
}

struct MemoryLogInner {
    topic: String,
    partition_count: u32,
    consumer_group: String,
    poll_timeout: Duration,
    partitions: DashMap<i32, Vec<MemoryEntry>>,
    /// (group, partition) -> next offset to consume
    committed: DashMap<(String, i32), i64>,
    appended: Notify,
}

/// In-memory commit log backend.
#[derive(Clone)]
pub struct MemoryCommitLog {
    inner: Arc<MemoryLogInner>,
}

impl MemoryCommitLog {
    pub fn new(config: &LogConfig) -> Self {
        Self::with_options(
            &config.topic,
            config.partitions,
            &config.consumer_group,
            Duration::from_millis(config.poll_timeout_ms),
        )
    }

    pub fn with_options(
        topic: &str,
        partitions: u32,
        consumer_group: &str,
        poll_timeout: Duration,
    ) -> Self {
        let partition_count = partitions.max(1);
        let entries = DashMap::new();
        for p in 0..partition_count as i32 {
            entries.insert(p, Vec::new());
        }

        Self {
            inner: Arc::new(MemoryLogInner {
                topic: topic.to_string(),
                partition_count,
                consumer_group: consumer_group.to_string(),
                poll_timeout,
                partitions: entries,
                committed: DashMap::new(),
                appended: Notify::new(),
            }),
        }
    }

    /// Partition a key is routed to.
    pub fn partition_for(&self, key: &str) -> i32 {
        partition_for_key(key, self.inner.partition_count)
    }

    /// Total records appended across all partitions.
    pub fn len(&self) -> usize {
        self.inner.partitions.iter().map(|p| p.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn partition_len(&self, partition: i32) -> usize {
        self.inner
            .partitions
            .get(&partition)
            .map(|p| p.value().len())
            .unwrap_or(0)
    }

    /// Next offset the configured consumer group will read from `partition`,
    /// or `None` if nothing was ever committed there.
    pub fn committed_offset(&self, partition: i32) -> Option<i64> {
        self.inner
            .committed
            .get(&(self.inner.consumer_group.clone(), partition))
            .map(|c| *c.value())
    }

    /// Records appended but not yet committed by the configured group.
    pub fn uncommitted(&self) -> usize {
        (0..self.inner.partition_count as i32)
            .map(|p| {
                let committed = self.committed_offset(p).unwrap_or(0).max(0) as usize;
                self.partition_len(p).saturating_sub(committed)
            })
            .sum()
    }

    /// Consumer for one group member, starting at the group's committed offsets.
    pub fn member_consumer(&self, member: &ConsumerMember) -> MemoryLogConsumer {
        let partitions = member.assigned_partitions(self.inner.partition_count);
        let positions = partitions
            .iter()
            .map(|p| (*p, self.committed_offset(*p).unwrap_or(0)))
            .collect();

        MemoryLogConsumer {
            log: self.inner.clone(),
            group: self.inner.consumer_group.clone(),
            partitions,
            positions,
            cursor: 0,
        }
    }
}

#[async_trait]
impl LogProducer for MemoryCommitLog {
    async fn publish(&self, key: &str, payload: &[u8]) -> Result<PublishAck, LogError> {
        let partition = self.partition_for(key);
        let offset = {
            let mut entries = self
                .inner
                .partitions
                .get_mut(&partition)
                .ok_or_else(|| LogError::Publish(format!("unknown partition {}", partition)))?;
            entries.push(MemoryEntry {
                key: Some(key.to_string()),
                payload: payload.to_vec(),
            });
            (entries.len() - 1) as i64
        };

        self.inner.appended.notify_waiters();

        Ok(PublishAck {
            partition: Some(partition),
            offset: Some(RecordOffset::Sequence(offset)),
        })
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl CommitLog for MemoryCommitLog {
    fn producer(&self) -> Arc<dyn LogProducer> {
        Arc::new(self.clone())
    }

    async fn consumer(&self, member: ConsumerMember) -> Result<Box<dyn LogConsumer>, LogError> {
        Ok(Box::new(self.member_consumer(&member)))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

/// Consumer over a subset of the memory log's partitions.
pub struct MemoryLogConsumer {
    log: Arc<MemoryLogInner>,
    group: String,
    partitions: Vec<i32>,
    positions: HashMap<i32, i64>,
    /// Round-robin start index into `partitions`
    cursor: usize,
}

impl MemoryLogConsumer {
    fn next_available(&mut self) -> Option<LogRecord> {
        let count = self.partitions.len();
        for step in 0..count {
            let idx = (self.cursor + step) % count;
            let partition = self.partitions[idx];
            let position = self.positions.get(&partition).copied().unwrap_or(0);

            let entry = self
                .log
                .partitions
                .get(&partition)
                .and_then(|entries| entries.get(position as usize).cloned());

            if let Some(entry) = entry {
                self.positions.insert(partition, position + 1);
                self.cursor = (idx + 1) % count;
                return Some(LogRecord {
                    topic: self.log.topic.clone(),
                    partition,
                    offset: RecordOffset::Sequence(position),
                    key: entry.key,
                    payload: entry.payload,
                });
            }
        }
        None
    }
}

#[async_trait]
impl LogConsumer for MemoryLogConsumer {
    async fn poll(&mut self) -> Result<Option<LogRecord>, LogError> {
        if self.partitions.is_empty() {
            tokio::time::sleep(self.log.poll_timeout).await;
            return Ok(None);
        }

        // Register interest before checking so an append in between still wakes us
        let log = self.log.clone();
        let notified = log.appended.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(record) = self.next_available() {
            return Ok(Some(record));
        }

        if tokio::time::timeout(self.log.poll_timeout, notified)
            .await
            .is_err()
        {
            return Ok(None);
        }

        Ok(self.next_available())
    }

    async fn commit(&mut self, record: &LogRecord) -> Result<(), LogError> {
        let RecordOffset::Sequence(offset) = record.offset else {
            return Err(LogError::Commit(format!(
                "memory log cannot commit offset {}",
                record.offset
            )));
        };

        let next = offset + 1;
        self.log
            .committed
            .entry((self.group.clone(), record.partition))
            .and_modify(|committed| *committed = (*committed).max(next))
            .or_insert(next);

        Ok(())
    }
}
