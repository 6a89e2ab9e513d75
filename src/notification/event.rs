use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::NotificationPayload;

/// Dispatch request as it travels over the commit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    /// Correlation id for logs; not part of validity
    #[serde(default = "Uuid::new_v4")]
    pub event_id: Uuid,
    pub target_token: String,
    pub payload: NotificationPayload,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(target_token: impl Into<String>, payload: NotificationPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            target_token: target_token.into(),
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn has_valid_token(&self) -> bool {
        !self.target_token.trim().is_empty()
    }

    pub fn has_valid_content(&self) -> bool {
        !self.payload.title().trim().is_empty()
    }

    /// Reason this event must not be published, if any
    pub fn validation_error(&self) -> Option<&'static str> {
        if !self.has_valid_token() {
            Some("missing target token")
        } else if !self.has_valid_content() {
            Some("missing title")
        } else {
            None
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
