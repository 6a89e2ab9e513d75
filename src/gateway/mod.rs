//! Push gateway clients.
//!
//! `PushGateway` is the single outbound call of the pipeline. Every caller
//! (delivery worker, retry sweeper, direct sender) goes through a
//! [`GuardedGateway`], which bounds each call with a timeout and a circuit
//! breaker. All [`GatewayError`] variants are transient from the retry
//! store's point of view.

mod fcm;
mod guarded;
mod logging;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use fcm::{FcmCredentials, FcmGateway};
pub use guarded::GuardedGateway;
pub use logging::LoggingGateway;

use crate::config::GatewayConfig;
use crate::notification::NotificationPayload;
use crate::resilience::CircuitBreakerConfig;

/// Provider-assigned id of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failure of a single gateway call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The provider answered and rejected the message
    #[error("provider error {code}: {message}")]
    Provider { code: String, message: String },

    /// The request never got a usable answer
    #[error("transport error: {0}")]
    Transport(String),

    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),

    #[error("gateway circuit breaker is open")]
    CircuitOpen,
}

impl GatewayError {
    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Provider { .. } => "provider",
            GatewayError::Transport(_) => "transport",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::CircuitOpen => "circuit_open",
        }
    }

    /// Whether this failure says the gateway itself is unhealthy.
    ///
    /// A provider rejecting one token (unregistered, invalid argument) is
    /// not; outages, quota exhaustion and server errors are.
    pub fn indicates_outage(&self) -> bool {
        match self {
            GatewayError::Transport(_) | GatewayError::Timeout(_) => true,
            GatewayError::Provider { code, .. } => {
                matches!(
                    code.as_str(),
                    "UNAVAILABLE" | "INTERNAL" | "QUOTA_EXCEEDED" | "RESOURCE_EXHAUSTED"
                ) || code.starts_with('5')
            }
            GatewayError::CircuitOpen => false,
        }
    }
}

/// Third-party push service.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(
        &self,
        token: &str,
        payload: &NotificationPayload,
    ) -> Result<MessageId, GatewayError>;

    /// Gateway name (for logging/metrics)
    fn name(&self) -> &'static str;
}

/// Create the configured gateway wrapped in its timeout and circuit breaker.
///
/// - `"fcm"`: Firebase Cloud Messaging HTTP v1
/// - `"log"` (default): logs and accepts every message
pub fn create_gateway(settings: &GatewayConfig) -> Arc<GuardedGateway> {
    let inner: Arc<dyn PushGateway> = match settings.kind.as_str() {
        "fcm" => {
            let credentials = match &settings.access_token {
                Some(token) => FcmCredentials::Static(token.clone()),
                None => FcmCredentials::application_default(),
            };
            tracing::info!(
                gateway = "fcm",
                project_id = %settings.project_id,
                base_url = %settings.base_url,
                static_token = settings.access_token.is_some(),
                "Creating FCM push gateway"
            );
            Arc::new(FcmGateway::new(
                &settings.base_url,
                &settings.project_id,
                credentials,
            ))
        }
        "log" => {
            tracing::info!(gateway = "log", "Creating logging push gateway");
            Arc::new(LoggingGateway::new())
        }
        other => {
            tracing::warn!(gateway = %other, "Unknown gateway kind, using logging gateway");
            Arc::new(LoggingGateway::new())
        }
    };

    Arc::new(GuardedGateway::new(
        inner,
        Duration::from_millis(settings.timeout_ms),
        CircuitBreakerConfig {
            failure_threshold: settings.circuit_breaker_failure_threshold,
            success_threshold: settings.circuit_breaker_success_threshold,
            reset_timeout_ms: settings.circuit_breaker_reset_timeout_ms,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outage_classification() {
        assert!(GatewayError::Transport("reset".into()).indicates_outage());
        assert!(GatewayError::Timeout(Duration::from_secs(1)).indicates_outage());
        assert!(GatewayError::Provider {
            code: "UNAVAILABLE".into(),
            message: "try later".into()
        }
        .indicates_outage());
        assert!(GatewayError::Provider {
            code: "503".into(),
            message: String::new()
        }
        .indicates_outage());
        assert!(!GatewayError::Provider {
            code: "UNREGISTERED".into(),
            message: "stale token".into()
        }
        .indicates_outage());
        assert!(!GatewayError::CircuitOpen.indicates_outage());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(GatewayError::CircuitOpen.kind(), "circuit_open");
        assert_eq!(
            GatewayError::Timeout(Duration::from_millis(5)).kind(),
            "timeout"
        );
    }

    #[test]
    fn test_factory_defaults_to_logging_gateway() {
        let gateway = create_gateway(&GatewayConfig::default());
        assert_eq!(gateway.name(), "log");
        assert_eq!(gateway.timeout(), Duration::from_millis(10_000));
    }

    #[test]
    fn test_factory_builds_fcm() {
        let settings = GatewayConfig {
            kind: "fcm".into(),
            project_id: "demo".into(),
            access_token: Some("static".into()),
            ..GatewayConfig::default()
        };
        assert_eq!(create_gateway(&settings).name(), "fcm");
    }
}
