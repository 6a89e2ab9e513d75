//! Dispatch strategy.
//!
//! Callers hand a device token and a payload to a [`NotificationSender`].
//! Exactly one implementation is active per process, chosen once by
//! [`create_sender`]:
//! - [`QueuedSender`]: publishes to the commit log; delivery and retries
//!   happen later in the delivery worker and retry sweeper
//! - [`DirectSender`]: calls the push gateway in the caller's task; a
//!   failure is final for that attempt

mod direct;
mod queued;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use direct::DirectSender;
pub use queued::QueuedSender;

use crate::commit_log::{LogProducer, RecordOffset};
use crate::config::Settings;
use crate::gateway::{GatewayError, MessageId, PushGateway};
use crate::notification::NotificationPayload;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid notification request: {0}")]
    InvalidRequest(&'static str),

    #[error("Push gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Which sender implementation is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStrategy {
    Queued,
    Direct,
}

impl DispatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStrategy::Queued => "queued",
            DispatchStrategy::Direct => "direct",
        }
    }
}

impl fmt::Display for DispatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single `send` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Broker acknowledged the event
    Published {
        partition: Option<i32>,
        offset: Option<RecordOffset>,
    },
    /// Gateway accepted the message (direct strategy)
    Delivered { message_id: MessageId },
    /// Request was malformed and dropped
    Skipped { reason: &'static str },
    /// Broker did not acknowledge; the notification is lost
    NotPublished { reason: String },
}

impl DispatchOutcome {
    /// Label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Published { .. } => "published",
            DispatchOutcome::Delivered { .. } => "delivered",
            DispatchOutcome::Skipped { .. } => "skipped",
            DispatchOutcome::NotPublished { .. } => "not_published",
        }
    }
}

/// Entry point for domain code that wants a device notified.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        target_token: &str,
        payload: NotificationPayload,
    ) -> Result<DispatchOutcome, DispatchError>;

    fn strategy(&self) -> DispatchStrategy;
}

/// Build the sender selected by `dispatch.strategy`.
///
/// - `"queued"` (default): `QueuedSender` if a producer is provided
/// - `"direct"`: `DirectSender`
pub fn create_sender(
    settings: &Settings,
    producer: Option<Arc<dyn LogProducer>>,
    gateway: Arc<dyn PushGateway>,
) -> Arc<dyn NotificationSender> {
    let publish_timeout = Duration::from_millis(settings.log.publish_timeout_ms);

    match settings.dispatch.strategy.as_str() {
        "direct" => {
            tracing::info!(strategy = "direct", gateway = gateway.name(), "Creating direct sender");
            Arc::new(DirectSender::new(gateway))
        }
        other => {
            if other != "queued" {
                tracing::warn!(strategy = %other, "Unknown dispatch strategy, using queued");
            }
            match producer {
                Some(producer) => {
                    tracing::info!(
                        strategy = "queued",
                        backend = producer.backend_type(),
                        "Creating queued sender"
                    );
                    Arc::new(QueuedSender::new(producer, publish_timeout))
                }
                None => {
                    tracing::warn!(
                        "Queued dispatch requested but no commit log producer provided, falling back to direct"
                    );
                    Arc::new(DirectSender::new(gateway))
                }
            }
        }
    }
}
