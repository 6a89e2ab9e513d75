//! Chat webhook channel (Slack-compatible `{"text": ...}` body).

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{EscalationAlert, EscalationError, EscalationNotifier};

#[derive(Serialize)]
struct WebhookMessage<'a> {
    text: &'a str,
    alert: &'a EscalationAlert,
}

pub struct WebhookNotifier {
    http_client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        Self::with_client(Client::new(), url)
    }

    pub fn with_client(http_client: Client, url: &str) -> Self {
        Self {
            http_client,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl EscalationNotifier for WebhookNotifier {
    async fn notify(&self, alert: &EscalationAlert) -> Result<(), EscalationError> {
        let text = alert.to_text();
        let response = self
            .http_client
            .post(&self.url)
            .json(&WebhookMessage {
                text: &text,
                alert,
            })
            .send()
            .await
            .map_err(|e| EscalationError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(EscalationError::Rejected(status.as_u16()))
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
