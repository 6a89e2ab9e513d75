use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::commit_log::{LogError, LogProducer};
use crate::escalation::mask_token;
use crate::metrics::DispatchMetrics;
use crate::notification::{NotificationEvent, NotificationPayload};

use super::{DispatchError, DispatchOutcome, DispatchStrategy, NotificationSender};

/// Publishes notification events to the commit log.
///
/// Never returns an error: malformed requests are skipped and broker
/// failures are reported as [`DispatchOutcome::NotPublished`], so the
/// caller's own work is never blocked by notification delivery.
pub struct QueuedSender {
    producer: Arc<dyn LogProducer>,
    publish_timeout: Duration,
}

impl QueuedSender {
    pub fn new(producer: Arc<dyn LogProducer>, publish_timeout: Duration) -> Self {
        Self {
            producer,
            publish_timeout,
        }
    }

    async fn publish(&self, event: &NotificationEvent) -> Result<DispatchOutcome, LogError> {
        let bytes = event
            .to_bytes()
            .map_err(|e| LogError::Publish(format!("serialize event: {}", e)))?;

        let start = Instant::now();
        let ack = tokio::time::timeout(
            self.publish_timeout,
            self.producer.publish(&event.target_token, &bytes),
        )
        .await
        .map_err(|_| LogError::PublishTimeout(self.publish_timeout))??;
        DispatchMetrics::record_publish_latency(
            self.producer.backend_type(),
            start.elapsed().as_secs_f64(),
        );

        Ok(DispatchOutcome::Published {
            partition: ack.partition,
            offset: ack.offset,
        })
    }
}

#[async_trait]
impl NotificationSender for QueuedSender {
    #[tracing::instrument(skip_all, fields(token = %mask_token(target_token), strategy = "queued"))]
    async fn send(
        &self,
        target_token: &str,
        payload: NotificationPayload,
    ) -> Result<DispatchOutcome, DispatchError> {
        let event = NotificationEvent::new(target_token, payload);

        let outcome = if let Some(reason) = event.validation_error() {
            tracing::warn!(event_id = %event.event_id, reason = reason, "Dropping invalid notification");
            DispatchOutcome::Skipped { reason }
        } else {
            match self.publish(&event).await {
                Ok(outcome) => {
                    tracing::debug!(event_id = %event.event_id, "Notification published");
                    outcome
                }
                Err(e) => {
                    tracing::error!(
                        event_id = %event.event_id,
                        backend = self.producer.backend_type(),
                        error = %e,
                        "Failed to publish notification"
                    );
                    DispatchOutcome::NotPublished {
                        reason: e.to_string(),
                    }
                }
            }
        };

        DispatchMetrics::record_outcome(DispatchStrategy::Queued.as_str(), outcome.label());
        Ok(outcome)
    }

    fn strategy(&self) -> DispatchStrategy {
        DispatchStrategy::Queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit_log::{MemoryCommitLog, PublishAck};
    use crate::notification::PayloadBuilder;

    fn memory_log() -> MemoryCommitLog {
        MemoryCommitLog::with_options("push", 4, "workers", Duration::from_millis(10))
    }

    struct BrokenProducer;

    #[async_trait]
    impl LogProducer for BrokenProducer {
        async fn publish(&self, _key: &str, _payload: &[u8]) -> Result<PublishAck, LogError> {
            Err(LogError::Publish("broker down".into()))
        }

        fn backend_type(&self) -> &'static str {
            "broken"
        }
    }

    struct StalledProducer;

    #[async_trait]
    impl LogProducer for StalledProducer {
        async fn publish(&self, _key: &str, _payload: &[u8]) -> Result<PublishAck, LogError> {
            std::future::pending().await
        }

        fn backend_type(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_publishes_keyed_by_token() {
        let log = memory_log();
        let sender = QueuedSender::new(Arc::new(log.clone()), Duration::from_secs(1));

        let outcome = sender
            .send("device-1", PayloadBuilder::new_follower("mina", "m-1"))
            .await
            .unwrap();

        let expected_partition = log.partition_for("device-1");
        assert!(matches!(
            outcome,
            DispatchOutcome::Published { partition: Some(p), .. } if p == expected_partition
        ));
        assert_eq!(log.partition_len(expected_partition), 1);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_skipped() {
        let log = memory_log();
        let sender = QueuedSender::new(Arc::new(log.clone()), Duration::from_secs(1));

        let blank_token = sender
            .send("", PayloadBuilder::new_follower("mina", "m-1"))
            .await
            .unwrap();
        assert_eq!(
            blank_token,
            DispatchOutcome::Skipped {
                reason: "missing target token"
            }
        );

        let blank_title = NotificationPayload::from_snapshot(r#"{"title":"   "}"#).unwrap();
        let outcome = sender.send("device-1", blank_title).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Skipped { .. }));

        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_broker_failure_is_not_an_error() {
        let sender = QueuedSender::new(Arc::new(BrokenProducer), Duration::from_secs(1));
        let outcome = sender
            .send("device-1", PayloadBuilder::new_follower("mina", "m-1"))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::NotPublished { .. }));
    }

    #[tokio::test]
    async fn test_publish_timeout() {
        let sender = QueuedSender::new(Arc::new(StalledProducer), Duration::from_millis(20));
        let outcome = sender
            .send("device-1", PayloadBuilder::new_follower("mina", "m-1"))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::NotPublished { reason } if reason.contains("not acknowledged")
        ));
    }
}
