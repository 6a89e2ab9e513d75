//! Escalation notifier.
//!
//! Delivery failures are reported to an out-of-band channel (ops chat
//! webhook or the log). Alerts carry a masked device token, never the raw
//! one. Sending is fire-and-forget: the [`Escalator`] spawns each alert on
//! its own task with a timeout, so a slow or broken channel never delays
//! or fails a delivery attempt.

mod alert;
mod webhook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;

pub use alert::{mask_token, EscalationAlert, EscalationStage, DEFAULT_BODY_EXCERPT_CHARS};
pub use webhook::WebhookNotifier;

use crate::config::EscalationConfig;
use crate::metrics::EscalationMetrics;
use crate::notification::NotificationPayload;

#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("alert rejected with status {0}")]
    Rejected(u16),
}

/// An alert channel.
#[async_trait]
pub trait EscalationNotifier: Send + Sync {
    async fn notify(&self, alert: &EscalationAlert) -> Result<(), EscalationError>;

    /// Channel name (for logging)
    fn name(&self) -> &'static str;
}

/// Channel that only writes alerts to the service log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl EscalationNotifier for LogNotifier {
    async fn notify(&self, alert: &EscalationAlert) -> Result<(), EscalationError> {
        tracing::warn!(
            token = %alert.masked_token,
            title = %alert.title,
            reason = %alert.reason,
            stage = alert.stage.label(),
            occurred_at = %alert.occurred_at,
            "Push delivery escalation"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Fire-and-forget front for an [`EscalationNotifier`].
pub struct Escalator {
    notifier: Arc<dyn EscalationNotifier>,
    timeout: Duration,
    body_max_chars: usize,
}

impl Escalator {
    pub fn new(notifier: Arc<dyn EscalationNotifier>, timeout: Duration, body_max_chars: usize) -> Self {
        Self {
            notifier,
            timeout,
            body_max_chars,
        }
    }

    pub fn notifier_name(&self) -> &'static str {
        self.notifier.name()
    }

    /// Report a failed attempt to deliver `payload` to `token`.
    pub fn delivery_failed(
        &self,
        token: &str,
        payload: &NotificationPayload,
        reason: impl Into<String>,
        stage: EscalationStage,
    ) -> JoinHandle<()> {
        let alert = EscalationAlert::new(
            token,
            payload.title(),
            payload.body(),
            reason,
            stage,
            self.body_max_chars,
        );
        self.escalate(alert)
    }

    /// Send `alert` in the background.
    ///
    /// The returned handle may be dropped; the alert is still sent.
    pub fn escalate(&self, alert: EscalationAlert) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let stage = alert.stage.label();
            match tokio::time::timeout(timeout, notifier.notify(&alert)).await {
                Ok(Ok(())) => EscalationMetrics::record_sent(stage),
                Ok(Err(e)) => {
                    EscalationMetrics::record_failed(stage);
                    tracing::warn!(
                        notifier = notifier.name(),
                        token = %alert.masked_token,
                        error = %e,
                        "Escalation alert failed"
                    );
                }
                Err(_) => {
                    EscalationMetrics::record_timeout(stage);
                    tracing::warn!(
                        notifier = notifier.name(),
                        token = %alert.masked_token,
                        timeout_ms = timeout.as_millis() as u64,
                        "Escalation alert timed out"
                    );
                }
            }
        })
    }
}

/// Create the escalator for the configured channel.
///
/// - `"webhook"`: JSON POST to `escalation.webhook_url`
/// - `"log"` (default): log only
pub fn create_escalator(settings: &EscalationConfig) -> Arc<Escalator> {
    let notifier: Arc<dyn EscalationNotifier> = match settings.kind.as_str() {
        "webhook" => match &settings.webhook_url {
            Some(url) if !url.trim().is_empty() => {
                tracing::info!(notifier = "webhook", "Creating webhook escalation notifier");
                Arc::new(WebhookNotifier::new(url))
            }
            _ => {
                tracing::warn!("Webhook escalation requested but no URL configured, falling back to log");
                Arc::new(LogNotifier)
            }
        },
        _ => {
            tracing::info!(notifier = "log", "Creating log escalation notifier");
            Arc::new(LogNotifier)
        }
    };

    Arc::new(Escalator::new(
        notifier,
        Duration::from_millis(settings.timeout_ms),
        settings.body_max_chars,
    ))
}
