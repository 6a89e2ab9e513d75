//! Development gateway: logs each message and accepts it.

use async_trait::async_trait;
use uuid::Uuid;

use crate::escalation::mask_token;
use crate::notification::NotificationPayload;

use super::{GatewayError, MessageId, PushGateway};

#[derive(Debug, Default)]
pub struct LoggingGateway;

impl LoggingGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PushGateway for LoggingGateway {
    async fn send(
        &self,
        token: &str,
        payload: &NotificationPayload,
    ) -> Result<MessageId, GatewayError> {
        let message_id = MessageId::new(format!("log-{}", Uuid::new_v4()));
        tracing::info!(
            token = %mask_token(token),
            title = %payload.title(),
            kind = payload.kind().unwrap_or("unknown"),
            message_id = %message_id,
            "Push notification (logging gateway)"
        );
        Ok(message_id)
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::PayloadBuilder;

    #[tokio::test]
    async fn test_accepts_and_returns_unique_ids() {
        let gateway = LoggingGateway::new();
        let payload = PayloadBuilder::post_liked("ana", "p1");

        let first = gateway.send("token-123456789", &payload).await.unwrap();
        let second = gateway.send("token-123456789", &payload).await.unwrap();
        assert!(first.as_str().starts_with("log-"));
        assert_ne!(first, second);
    }
}
