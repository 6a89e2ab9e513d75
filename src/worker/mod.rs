//! Delivery worker.
//!
//! Consumes notification events from the commit log and forwards each to
//! the push gateway. Per record:
//!
//! ```text
//! RECEIVED -> SEND_ATTEMPTED -> ACKED_SUCCESS
//!          \                 \-> ACKED_FAILURE (retry record + escalation)
//!           \-> ACKED_FAILURE (poison, no retry record)
//! ```
//!
//! The offset is committed exactly once, after the outcome is handled,
//! whatever the outcome. Failed sends are recovered by the retry sweeper,
//! never by log redelivery.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::commit_log::{CommitLog, ConsumerMember, LogConsumer, LogError, LogRecord};
use crate::config::WorkerConfig;
use crate::escalation::{mask_token, EscalationStage, Escalator};
use crate::gateway::{MessageId, PushGateway};
use crate::metrics::{RetryStoreMetrics, WorkerMetrics};
use crate::notification::NotificationEvent;
use crate::resilience::{BackoffConfig, ExponentialBackoff};
use crate::retry::{NewFailedDelivery, RetryStore};

/// Processing state of one log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Received,
    SendAttempted,
    AckedSuccess,
    AckedFailure,
}

/// What happened to one log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered {
        message_id: MessageId,
    },
    /// Send failed; `record_id` is `None` if the retry store write failed too
    Failed {
        record_id: Option<Uuid>,
        reason: String,
    },
    /// Record could not be decoded
    Poison {
        reason: String,
    },
}

impl DeliveryOutcome {
    pub fn final_state(&self) -> MessageState {
        match self {
            DeliveryOutcome::Delivered { .. } => MessageState::AckedSuccess,
            DeliveryOutcome::Failed { .. } | DeliveryOutcome::Poison { .. } => {
                MessageState::AckedFailure
            }
        }
    }
}

/// Collaborators shared by every worker instance.
#[derive(Clone)]
pub struct WorkerContext {
    pub gateway: Arc<dyn PushGateway>,
    pub retry_store: Arc<dyn RetryStore>,
    pub escalator: Arc<Escalator>,
}

/// One consumer group member forwarding records to the push gateway.
pub struct DeliveryWorker {
    name: String,
    consumer: Box<dyn LogConsumer>,
    context: WorkerContext,
    backoff: ExponentialBackoff,
    shutdown: broadcast::Receiver<()>,
}

impl DeliveryWorker {
    pub fn new(
        name: impl Into<String>,
        consumer: Box<dyn LogConsumer>,
        context: WorkerContext,
        config: &WorkerConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            consumer,
            context,
            backoff: ExponentialBackoff::with_config(BackoffConfig {
                initial_delay_ms: config.backoff_initial_delay_ms,
                max_delay_ms: config.backoff_max_delay_ms,
                ..BackoffConfig::default()
            }),
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consume until shutdown.
    pub async fn run(mut self) {
        WorkerMetrics::worker_started();
        tracing::info!(worker = %self.name, "Delivery worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!(worker = %self.name, "Delivery worker received shutdown signal");
                    break;
                }
                polled = self.consumer.poll() => match polled {
                    Ok(Some(record)) => {
                        self.backoff.reset();
                        self.process(record).await;
                    }
                    Ok(None) => self.backoff.reset(),
                    Err(e) => {
                        WorkerMetrics::record_poll_error();
                        let delay = self.backoff.next_delay();
                        tracing::warn!(
                            worker = %self.name,
                            error = %e,
                            attempt = self.backoff.attempt(),
                            delay_ms = delay.as_millis() as u64,
                            "Commit log poll failed, backing off"
                        );
                        if self.wait_or_shutdown(delay).await {
                            break;
                        }
                    }
                }
            }
        }

        WorkerMetrics::worker_stopped();
        tracing::info!(worker = %self.name, "Delivery worker stopped");
    }

    /// Poll once and process the record if one arrived.
    pub async fn poll_once(&mut self) -> Result<Option<DeliveryOutcome>, LogError> {
        match self.consumer.poll().await? {
            Some(record) => Ok(Some(self.process(record).await)),
            None => Ok(None),
        }
    }

    /// Handle `record`, then commit it exactly once.
    pub async fn process(&mut self, record: LogRecord) -> DeliveryOutcome {
        let outcome = handle_record(&self.context, &record).await;

        match &outcome {
            DeliveryOutcome::Delivered { .. } => WorkerMetrics::record_delivered(),
            DeliveryOutcome::Failed { .. } => WorkerMetrics::record_failed(),
            DeliveryOutcome::Poison { .. } => WorkerMetrics::record_poison(),
        }

        if let Err(e) = self.consumer.commit(&record).await {
            WorkerMetrics::record_commit_failure();
            tracing::error!(
                worker = %self.name,
                partition = record.partition,
                offset = %record.offset,
                error = %e,
                "Offset commit failed, record may be redelivered"
            );
        }

        tracing::trace!(
            worker = %self.name,
            partition = record.partition,
            offset = %record.offset,
            state = ?outcome.final_state(),
            "Record acknowledged"
        );
        outcome
    }

    /// Returns `true` if shutdown fired while waiting.
    async fn wait_or_shutdown(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.recv() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }
}

/// Decode `record` and attempt delivery. Does not commit.
pub async fn handle_record(context: &WorkerContext, record: &LogRecord) -> DeliveryOutcome {
    tracing::trace!(
        partition = record.partition,
        offset = %record.offset,
        state = ?MessageState::Received,
        "Record received"
    );

    let event = match NotificationEvent::from_slice(&record.payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                partition = record.partition,
                offset = %record.offset,
                error = %e,
                "Skipping undecodable record"
            );
            return DeliveryOutcome::Poison {
                reason: e.to_string(),
            };
        }
    };

    tracing::trace!(event_id = %event.event_id, state = ?MessageState::SendAttempted, "Sending");

    let attempt = match event.validation_error() {
        Some(reason) => Err(reason.to_string()),
        None => context
            .gateway
            .send(&event.target_token, &event.payload)
            .await
            .map_err(|e| e.to_string()),
    };

    match attempt {
        Ok(message_id) => {
            tracing::debug!(
                event_id = %event.event_id,
                message_id = %message_id,
                "Notification delivered"
            );
            DeliveryOutcome::Delivered { message_id }
        }
        Err(reason) => record_failure(context, &event, reason).await,
    }
}

async fn record_failure(
    context: &WorkerContext,
    event: &NotificationEvent,
    reason: String,
) -> DeliveryOutcome {
    tracing::warn!(
        event_id = %event.event_id,
        token = %mask_token(&event.target_token),
        error = %reason,
        "Delivery failed, recording for retry"
    );

    let record_id = match NewFailedDelivery::new(&event.target_token, &event.payload, reason.as_str())
    {
        Ok(failure) => match context.retry_store.record_failure(failure).await {
            Ok(record) => Some(record.id),
            Err(e) => {
                RetryStoreMetrics::record_error("record_failure");
                tracing::error!(
                    event_id = %event.event_id,
                    error = %e,
                    "Failed to write retry record"
                );
                None
            }
        },
        Err(e) => {
            tracing::error!(event_id = %event.event_id, error = %e, "Failed to snapshot payload");
            None
        }
    };

    context.escalator.delivery_failed(
        &event.target_token,
        &event.payload,
        reason.as_str(),
        EscalationStage::InitialDelivery,
    );

    DeliveryOutcome::Failed { record_id, reason }
}

/// Start `config.instances` workers in the configured consumer group.
pub async fn spawn_workers(
    commit_log: &dyn CommitLog,
    context: WorkerContext,
    config: &WorkerConfig,
    shutdown: &broadcast::Sender<()>,
) -> Result<Vec<JoinHandle<()>>, LogError> {
    let count = config.instances.max(1);
    let mut handles = Vec::with_capacity(count);

    for index in 0..count {
        let member = ConsumerMember::new(format!("worker-{}", index), index, count);
        let name = member.name.clone();
        let consumer = commit_log.consumer(member).await?;
        let worker = DeliveryWorker::new(name, consumer, context.clone(), config, shutdown.subscribe());
        handles.push(tokio::spawn(worker.run()));
    }

    tracing::info!(
        instances = count,
        backend = commit_log.backend_type(),
        "Delivery workers spawned"
    );
    Ok(handles)
}
