use std::sync::Arc;

use async_trait::async_trait;

use crate::escalation::mask_token;
use crate::gateway::PushGateway;
use crate::metrics::DispatchMetrics;
use crate::notification::{NotificationEvent, NotificationPayload};

use super::{DispatchError, DispatchOutcome, DispatchStrategy, NotificationSender};

/// Calls the push gateway synchronously; no retry recovery.
pub struct DirectSender {
    gateway: Arc<dyn PushGateway>,
}

impl DirectSender {
    pub fn new(gateway: Arc<dyn PushGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl NotificationSender for DirectSender {
    #[tracing::instrument(skip_all, fields(token = %mask_token(target_token), strategy = "direct"))]
    async fn send(
        &self,
        target_token: &str,
        payload: NotificationPayload,
    ) -> Result<DispatchOutcome, DispatchError> {
        let event = NotificationEvent::new(target_token, payload);
        if let Some(reason) = event.validation_error() {
            DispatchMetrics::record_outcome(DispatchStrategy::Direct.as_str(), "invalid");
            return Err(DispatchError::InvalidRequest(reason));
        }

        match self.gateway.send(&event.target_token, &event.payload).await {
            Ok(message_id) => {
                DispatchMetrics::record_outcome(DispatchStrategy::Direct.as_str(), "delivered");
                Ok(DispatchOutcome::Delivered { message_id })
            }
            Err(e) => {
                DispatchMetrics::record_outcome(DispatchStrategy::Direct.as_str(), "failed");
                tracing::warn!(error = %e, "Direct delivery failed");
                Err(e.into())
            }
        }
    }

    fn strategy(&self) -> DispatchStrategy {
        DispatchStrategy::Direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayError, LoggingGateway, MessageId};
    use crate::notification::PayloadBuilder;

    struct RejectingGateway;

    #[async_trait]
    impl PushGateway for RejectingGateway {
        async fn send(
            &self,
            _token: &str,
            _payload: &NotificationPayload,
        ) -> Result<MessageId, GatewayError> {
            Err(GatewayError::Provider {
                code: "UNREGISTERED".into(),
                message: "stale token".into(),
            })
        }

        fn name(&self) -> &'static str {
            "rejecting"
        }
    }

    #[tokio::test]
    async fn test_delivers_through_gateway() {
        let sender = DirectSender::new(Arc::new(LoggingGateway::new()));
        let outcome = sender
            .send("device-1", PayloadBuilder::new_follower("mina", "m-1"))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Delivered { .. }));
    }

    #[tokio::test]
    async fn test_invalid_request_is_an_error() {
        let sender = DirectSender::new(Arc::new(LoggingGateway::new()));
        let result = sender
            .send(" ", PayloadBuilder::new_follower("mina", "m-1"))
            .await;
        assert!(matches!(
            result,
            Err(DispatchError::InvalidRequest("missing target token"))
        ));
    }

    #[tokio::test]
    async fn test_gateway_failure_propagates() {
        let sender = DirectSender::new(Arc::new(RejectingGateway));
        let result = sender
            .send("device-1", PayloadBuilder::new_follower("mina", "m-1"))
            .await;
        assert!(matches!(
            result,
            Err(DispatchError::Gateway(GatewayError::Provider { code, .. })) if code == "UNREGISTERED"
        ));
    }
}
