//! Kafka commit log (rdkafka).
//!
//! The producer waits for full-ISR acknowledgment with idempotence enabled.
//! Consumers never auto-commit; `commit` stores `offset + 1` synchronously.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};

use crate::config::LogConfig;

use super::{
    CommitLog, ConsumerMember, LogConsumer, LogError, LogProducer, LogRecord, PublishAck,
    RecordOffset,
};

/// Producer publishing to the notification topic.
pub struct KafkaLogProducer {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaLogProducer {
    pub fn new(config: &LogConfig) -> Result<Self, LogError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("message.timeout.ms", config.publish_timeout_ms.to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()?;

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            timeout: Duration::from_millis(config.publish_timeout_ms),
        })
    }
}

#[async_trait]
impl LogProducer for KafkaLogProducer {
    async fn publish(&self, key: &str, payload: &[u8]) -> Result<PublishAck, LogError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);

        self.producer
            .send(record, self.timeout)
            .await
            .map_err(|(err, _)| LogError::Publish(err.to_string()))?;

        Ok(PublishAck::default())
    }

    fn backend_type(&self) -> &'static str {
        "kafka"
    }
}

/// Kafka-backed commit log.
pub struct KafkaCommitLog {
    config: LogConfig,
    producer: Arc<KafkaLogProducer>,
}

impl KafkaCommitLog {
    pub fn new(config: &LogConfig) -> Result<Self, LogError> {
        Ok(Self {
            config: config.clone(),
            producer: Arc::new(KafkaLogProducer::new(config)?),
        })
    }
}

#[async_trait]
impl CommitLog for KafkaCommitLog {
    fn producer(&self) -> Arc<dyn LogProducer> {
        self.producer.clone()
    }

    async fn consumer(&self, member: ConsumerMember) -> Result<Box<dyn LogConsumer>, LogError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.bootstrap_servers)
            .set("group.id", &self.config.consumer_group)
            .set("client.id", &member.name)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .create()?;

        consumer.subscribe(&[self.config.topic.as_str()])?;

        tracing::info!(
            consumer = %member.name,
            group = %self.config.consumer_group,
            topic = %self.config.topic,
            "Kafka consumer subscribed"
        );

        Ok(Box::new(KafkaLogConsumer {
            consumer,
            poll_timeout: Duration::from_millis(self.config.poll_timeout_ms),
        }))
    }

    fn backend_type(&self) -> &'static str {
        "kafka"
    }
}

/// Consumer group member; partitions are assigned by the broker.
pub struct KafkaLogConsumer {
    consumer: StreamConsumer,
    poll_timeout: Duration,
}

#[async_trait]
impl LogConsumer for KafkaLogConsumer {
    async fn poll(&mut self) -> Result<Option<LogRecord>, LogError> {
        let message = match tokio::time::timeout(self.poll_timeout, self.consumer.recv()).await {
            Err(_) => return Ok(None),
            Ok(Err(e)) => return Err(LogError::Consume(e.to_string())),
            Ok(Ok(message)) => message,
        };

        Ok(Some(LogRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: RecordOffset::Sequence(message.offset()),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }))
    }

    async fn commit(&mut self, record: &LogRecord) -> Result<(), LogError> {
        let RecordOffset::Sequence(offset) = record.offset else {
            return Err(LogError::Commit(format!(
                "kafka cannot commit offset {}",
                record.offset
            )));
        };

        let mut partitions = TopicPartitionList::new();
        partitions.add_partition_offset(&record.topic, record.partition, Offset::Offset(offset + 1))?;
        self.consumer.commit(&partitions, CommitMode::Sync)?;

        Ok(())
    }
}
