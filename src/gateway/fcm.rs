//! Firebase Cloud Messaging HTTP v1 client.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::escalation::mask_token;
use crate::notification::NotificationPayload;

use super::{GatewayError, MessageId, PushGateway};

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const FCM_ERROR_TYPE: &str = "type.googleapis.com/google.firebase.fcm.v1.FcmError";

/// How the client authenticates against FCM.
pub enum FcmCredentials {
    /// Pre-issued OAuth bearer token
    Static(String),
    /// Google application-default credentials, resolved on first use
    ApplicationDefault(OnceCell<Arc<dyn gcp_auth::TokenProvider>>),
}

impl FcmCredentials {
    pub fn application_default() -> Self {
        FcmCredentials::ApplicationDefault(OnceCell::new())
    }

    async fn bearer_token(&self) -> Result<String, GatewayError> {
        match self {
            FcmCredentials::Static(token) => Ok(token.clone()),
            FcmCredentials::ApplicationDefault(provider) => {
                let provider = provider
                    .get_or_try_init(gcp_auth::provider)
                    .await
                    .map_err(|e| GatewayError::Transport(format!("credentials: {}", e)))?;
                let token = provider
                    .token(&[FCM_SCOPE])
                    .await
                    .map_err(|e| GatewayError::Transport(format!("access token: {}", e)))?;
                Ok(token.as_str().to_string())
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Debug, Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
    data: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct FcmSendResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FcmErrorEnvelope {
    error: FcmErrorBody,
}

#[derive(Debug, Deserialize)]
struct FcmErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<FcmErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct FcmErrorDetail {
    #[serde(rename = "@type", default)]
    kind: String,
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
}

/// FCM HTTP v1 gateway.
pub struct FcmGateway {
    http_client: Client,
    send_url: String,
    credentials: FcmCredentials,
}

impl FcmGateway {
    pub fn new(base_url: &str, project_id: &str, credentials: FcmCredentials) -> Self {
        Self::with_client(Client::new(), base_url, project_id, credentials)
    }

    pub fn with_client(
        http_client: Client,
        base_url: &str,
        project_id: &str,
        credentials: FcmCredentials,
    ) -> Self {
        Self {
            http_client,
            send_url: format!(
                "{}/v1/projects/{}/messages:send",
                base_url.trim_end_matches('/'),
                project_id
            ),
            credentials,
        }
    }

    pub fn send_url(&self) -> &str {
        &self.send_url
    }
}

/// Turn an FCM error response into `Provider { code, message }`.
///
/// The FCM-specific `errorCode` detail wins over the generic RPC status,
/// which wins over the bare HTTP status.
fn provider_error(http_status: u16, body: &str) -> GatewayError {
    match serde_json::from_str::<FcmErrorEnvelope>(body) {
        Ok(envelope) => {
            let fcm_code = envelope
                .error
                .details
                .iter()
                .find(|d| d.kind == FCM_ERROR_TYPE)
                .and_then(|d| d.error_code.clone());
            GatewayError::Provider {
                code: fcm_code
                    .or(envelope.error.status)
                    .unwrap_or_else(|| http_status.to_string()),
                message: envelope.error.message,
            }
        }
        Err(_) => GatewayError::Provider {
            code: http_status.to_string(),
            message: body.chars().take(200).collect(),
        },
    }
}

#[async_trait]
impl PushGateway for FcmGateway {
    #[tracing::instrument(skip_all, fields(token = %mask_token(token)))]
    async fn send(
        &self,
        token: &str,
        payload: &NotificationPayload,
    ) -> Result<MessageId, GatewayError> {
        let bearer = self.credentials.bearer_token().await?;

        let request = FcmRequest {
            message: FcmMessage {
                token,
                notification: FcmNotification {
                    title: payload.title(),
                    body: payload.body(),
                    image: payload.image_url(),
                },
                data: payload.attributes(),
            },
        };

        let response = self
            .http_client
            .post(&self.send_url)
            .bearer_auth(bearer)
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let accepted: FcmSendResponse = response
                .json()
                .await
                .map_err(|e| GatewayError::Transport(format!("invalid FCM response: {}", e)))?;
            tracing::debug!(message_id = %accepted.name, "FCM accepted message");
            Ok(MessageId::new(accepted.name))
        } else {
            let body = response.text().await.unwrap_or_default();
            let error = provider_error(status.as_u16(), &body);
            tracing::debug!(status = status.as_u16(), error = %error, "FCM rejected message");
            Err(error)
        }
    }

    fn name(&self) -> &'static str {
        "fcm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_url() {
        let gateway = FcmGateway::new(
            "https://fcm.googleapis.com/",
            "my-project",
            FcmCredentials::Static("t".into()),
        );
        assert_eq!(
            gateway.send_url(),
            "https://fcm.googleapis.com/v1/projects/my-project/messages:send"
        );
    }

    #[test]
    fn test_provider_error_prefers_fcm_error_code() {
        let body = r#"{"error":{"code":404,"message":"Requested entity was not found.","status":"NOT_FOUND","details":[{"@type":"type.googleapis.com/google.firebase.fcm.v1.FcmError","errorCode":"UNREGISTERED"}]}}"#;
        assert_eq!(
            provider_error(404, body),
            GatewayError::Provider {
                code: "UNREGISTERED".into(),
                message: "Requested entity was not found.".into()
            }
        );
    }

    #[test]
    fn test_provider_error_falls_back_to_status() {
        let body = r#"{"error":{"code":503,"message":"busy","status":"UNAVAILABLE"}}"#;
        assert!(matches!(
            provider_error(503, body),
            GatewayError::Provider { code, .. } if code == "UNAVAILABLE"
        ));

        assert!(matches!(
            provider_error(502, "<html>bad gateway</html>"),
            GatewayError::Provider { code, .. } if code == "502"
        ));
    }

    #[test]
    fn test_request_shape() {
        let payload = NotificationPayload::builder(crate::notification::NotificationKind::Promotion)
            .title("Sale")
            .body("50% off")
            .build();
        let request = FcmRequest {
            message: FcmMessage {
                token: "tok",
                notification: FcmNotification {
                    title: payload.title(),
                    body: payload.body(),
                    image: payload.image_url(),
                },
                data: payload.attributes(),
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["message"]["token"], "tok");
        assert_eq!(json["message"]["notification"]["title"], "Sale");
        assert!(json["message"]["notification"].get("image").is_none());
        assert_eq!(json["message"]["data"]["type"], "promotion");
    }
}
