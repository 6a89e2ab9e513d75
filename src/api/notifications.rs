//! Notification trigger endpoint.

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchOutcome;
use crate::error::Result;
use crate::notification::{NotificationKind, NotificationPayload, PayloadBuilder};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    pub target_token: String,
    pub kind: NotificationKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl SendNotificationRequest {
    fn into_parts(self) -> (String, NotificationPayload) {
        let mut builder = PayloadBuilder::new(self.kind);
        if let Some(title) = self.title {
            builder = builder.title(title);
        }
        if let Some(body) = self.body {
            builder = builder.body(body);
        }
        if let Some(url) = self.image_url {
            builder = builder.image_url(url);
        }
        for (key, value) in self.attributes {
            builder = builder.attribute(key, value);
        }
        (self.target_token, builder.build())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationResponse {
    pub strategy: String,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// POST /api/v1/notifications
pub async fn send_notification(
    State(state): State<AppState>,
    Json(request): Json<SendNotificationRequest>,
) -> Result<(StatusCode, Json<SendNotificationResponse>)> {
    let (token, payload) = request.into_parts();
    let outcome = state.sender.send(&token, payload).await?;

    let mut response = SendNotificationResponse {
        strategy: state.sender.strategy().to_string(),
        outcome: outcome.label(),
        partition: None,
        offset: None,
        message_id: None,
        reason: None,
    };

    let status = match outcome {
        DispatchOutcome::Published { partition, offset } => {
            response.partition = partition;
            response.offset = offset.map(|o| o.to_string());
            StatusCode::ACCEPTED
        }
        DispatchOutcome::Delivered { message_id } => {
            response.message_id = Some(message_id.to_string());
            StatusCode::OK
        }
        DispatchOutcome::Skipped { reason } => {
            response.reason = Some(reason.to_string());
            StatusCode::OK
        }
        DispatchOutcome::NotPublished { reason } => {
            response.reason = Some(reason);
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    Ok((status, Json(response)))
}
