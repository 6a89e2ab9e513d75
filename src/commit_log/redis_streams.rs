//! Redis Streams commit log.
//!
//! Each partition is its own stream, `{prefix}:{topic}:{partition}`.
//! Consumers read through a consumer group (`XREADGROUP`) and commit with
//! `XACK`. A consumer first drains its own pending entries (delivered to it
//! before a crash but never acknowledged) and only then reads new ones.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use crate::config::LogConfig;
use crate::redis::RedisPool;

use super::{
    partition_for_key, CommitLog, ConsumerMember, LogConsumer, LogError, LogProducer, LogRecord,
    PublishAck, RecordOffset,
};

const KEY_FIELD: &str = "key";
const PAYLOAD_FIELD: &str = "payload";
const READ_BATCH: usize = 64;

/// Redis Streams backed commit log.
#[derive(Clone)]
pub struct RedisStreamLog {
    pool: Arc<RedisPool>,
    prefix: String,
    topic: String,
    consumer_group: String,
    partitions: u32,
    maxlen: usize,
    block_ms: usize,
}

impl RedisStreamLog {
    pub fn new(config: &LogConfig, pool: Arc<RedisPool>) -> Self {
        Self {
            pool,
            prefix: config.redis_prefix.clone(),
            topic: config.topic.clone(),
            consumer_group: config.consumer_group.clone(),
            partitions: config.partitions.max(1),
            maxlen: config.redis_maxlen,
            block_ms: config.poll_timeout_ms as usize,
        }
    }

    pub fn stream_key(&self, partition: i32) -> String {
        format!("{}:{}:{}", self.prefix, self.topic, partition)
    }

    /// Create the consumer group on a stream (and the stream itself).
    async fn ensure_group(&self, stream: &str) -> Result<(), LogError> {
        let key = stream.to_string();
        let group = self.consumer_group.clone();
        let result = self
            .pool
            .execute(|mut conn| async move {
                conn.xgroup_create_mkstream::<_, _, _, ()>(&key, &group, "0")
                    .await
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.has_code("BUSYGROUP") => Ok(()),
            Err(e) => Err(LogError::Redis(e)),
        }
    }
}

#[async_trait]
impl LogProducer for RedisStreamLog {
    async fn publish(&self, key: &str, payload: &[u8]) -> Result<PublishAck, LogError> {
        let partition = partition_for_key(key, self.partitions);
        let stream = self.stream_key(partition);
        let maxlen = self.maxlen;
        let fields = vec![
            (KEY_FIELD, key.as_bytes().to_vec()),
            (PAYLOAD_FIELD, payload.to_vec()),
        ];

        let id: String = self
            .pool
            .execute(|mut conn| async move {
                conn.xadd_maxlen(&stream, StreamMaxlen::Approx(maxlen), "*", &fields[..])
                    .await
            })
            .await?;

        Ok(PublishAck {
            partition: Some(partition),
            offset: Some(RecordOffset::StreamId(id)),
        })
    }

    fn backend_type(&self) -> &'static str {
        "redis"
    }
}

#[async_trait]
impl CommitLog for RedisStreamLog {
    fn producer(&self) -> Arc<dyn LogProducer> {
        Arc::new(self.clone())
    }

    async fn consumer(&self, member: ConsumerMember) -> Result<Box<dyn LogConsumer>, LogError> {
        let mut streams = Vec::new();
        for partition in member.assigned_partitions(self.partitions) {
            let key = self.stream_key(partition);
            self.ensure_group(&key).await?;
            streams.push((partition, key));
        }

        tracing::info!(
            consumer = %member.name,
            group = %self.consumer_group,
            streams = streams.len(),
            "Redis stream consumer joined group"
        );

        Ok(Box::new(RedisStreamConsumer {
            pool: self.pool.clone(),
            topic: self.topic.clone(),
            group: self.consumer_group.clone(),
            consumer_name: member.name,
            streams,
            buffer: VecDeque::new(),
            reading_pending: true,
            block_ms: self.block_ms,
        }))
    }

    fn backend_type(&self) -> &'static str {
        "redis"
    }
}

/// Consumer group member reading its assigned partition streams.
pub struct RedisStreamConsumer {
    pool: Arc<RedisPool>,
    topic: String,
    group: String,
    consumer_name: String,
    streams: Vec<(i32, String)>,
    buffer: VecDeque<LogRecord>,
    /// Still replaying entries delivered to this consumer but never acked
    reading_pending: bool,
    block_ms: usize,
}

impl RedisStreamConsumer {
    async fn fill_buffer(&mut self) -> Result<(), LogError> {
        let keys: Vec<String> = self.streams.iter().map(|(_, key)| key.clone()).collect();
        let start = if self.reading_pending { "0" } else { ">" };
        let ids: Vec<&str> = vec![start; keys.len()];

        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer_name)
            .count(READ_BATCH);
        if !self.reading_pending {
            options = options.block(self.block_ms);
        }

        let reply: Option<StreamReadReply> = self
            .pool
            .execute(|mut conn| async move { conn.xread_options(&keys[..], &ids[..], &options).await })
            .await?;

        let mut received = 0;
        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            let Some(partition) = self.partition_of(&stream.key) else {
                continue;
            };
            for entry in stream.ids {
                received += 1;
                // Trimmed pending entries come back without fields; they decode as poison
                let key = entry
                    .get::<Vec<u8>>(KEY_FIELD)
                    .map(|k| String::from_utf8_lossy(&k).into_owned());
                let payload = entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_default();
                self.buffer.push_back(LogRecord {
                    topic: self.topic.clone(),
                    partition,
                    offset: RecordOffset::StreamId(entry.id),
                    key,
                    payload,
                });
            }
        }

        if self.reading_pending && received == 0 {
            tracing::debug!(consumer = %self.consumer_name, "Pending entries drained");
            self.reading_pending = false;
        }

        Ok(())
    }

    fn partition_of(&self, stream_key: &str) -> Option<i32> {
        self.streams
            .iter()
            .find(|(_, key)| key == stream_key)
            .map(|(partition, _)| *partition)
    }
}

#[async_trait]
impl LogConsumer for RedisStreamConsumer {
    async fn poll(&mut self) -> Result<Option<LogRecord>, LogError> {
        if let Some(record) = self.buffer.pop_front() {
            return Ok(Some(record));
        }

        if self.streams.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(self.block_ms as u64)).await;
            return Ok(None);
        }

        let was_pending = self.reading_pending;
        self.fill_buffer().await?;
        if was_pending && !self.reading_pending {
            // Pending pass just finished; read new entries right away
            self.fill_buffer().await?;
        }

        Ok(self.buffer.pop_front())
    }

    async fn commit(&mut self, record: &LogRecord) -> Result<(), LogError> {
        let RecordOffset::StreamId(ref id) = record.offset else {
            return Err(LogError::Commit(format!(
                "redis stream cannot commit offset {}",
                record.offset
            )));
        };

        let key = self
            .streams
            .iter()
            .find(|(partition, _)| *partition == record.partition)
            .map(|(_, key)| key.clone())
            .ok_or_else(|| {
                LogError::Commit(format!("partition {} not assigned", record.partition))
            })?;
        let group = self.group.clone();
        let ids = [id.clone()];

        let _acked: i64 = self
            .pool
            .execute(|mut conn| async move { conn.xack(&key, &group, &ids[..]).await })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;

    fn stream_log() -> RedisStreamLog {
        let pool = Arc::new(RedisPool::new(&RedisConfig::default()).unwrap());
        let config = LogConfig {
            redis_prefix: "push:log".into(),
            topic: "notifications".into(),
            partitions: 4,
            ..LogConfig::default()
        };
        RedisStreamLog::new(&config, pool)
    }

    #[test]
    fn test_stream_key_layout() {
        let log = stream_log();
        assert_eq!(log.stream_key(3), "push:log:notifications:3");
    }

    #[test]
    fn test_partition_lookup() {
        let consumer = RedisStreamConsumer {
            pool: Arc::new(RedisPool::new(&RedisConfig::default()).unwrap()),
            topic: "t".into(),
            group: "g".into(),
            consumer_name: "c".into(),
            streams: vec![(1, "p:t:1".into()), (3, "p:t:3".into())],
            buffer: VecDeque::new(),
            reading_pending: true,
            block_ms: 10,
        };
        assert_eq!(consumer.partition_of("p:t:3"), Some(3));
        assert_eq!(consumer.partition_of("p:t:2"), None);
    }
}
