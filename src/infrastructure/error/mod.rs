use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::commit_log::LogError;
use crate::dispatch::DispatchError;
use crate::postgres::PostgresPoolError;
use crate::redis::PoolError;
use crate::retry::RetryStoreError;
use crate::telemetry::TelemetryError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Commit log error: {0}")]
    CommitLog(#[from] LogError),

    #[error("Retry store error: {0}")]
    RetryStore(#[from] RetryStoreError),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] PostgresPoolError),

    #[error("Redis error: {0}")]
    Redis(#[from] PoolError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            AppError::Telemetry(_) => (StatusCode::INTERNAL_SERVER_ERROR, "TELEMETRY_ERROR"),
            AppError::CommitLog(_) => (StatusCode::SERVICE_UNAVAILABLE, "COMMIT_LOG_ERROR"),
            AppError::RetryStore(_) => (StatusCode::SERVICE_UNAVAILABLE, "RETRY_STORE_ERROR"),
            AppError::Postgres(_) => (StatusCode::SERVICE_UNAVAILABLE, "POSTGRES_ERROR"),
            AppError::Redis(_) => (StatusCode::SERVICE_UNAVAILABLE, "REDIS_ERROR"),
            AppError::Dispatch(DispatchError::InvalidRequest(_)) | AppError::Validation(_) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            AppError::Dispatch(DispatchError::Gateway(_)) => {
                (StatusCode::BAD_GATEWAY, "GATEWAY_ERROR")
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let log_message = self.to_string();

        let client_message = match &self {
            AppError::NotFound(msg) | AppError::Validation(msg) => msg.clone(),
            AppError::Dispatch(DispatchError::InvalidRequest(reason)) => reason.to_string(),
            _ if is_production() => {
                if status == StatusCode::SERVICE_UNAVAILABLE {
                    "Service temporarily unavailable".to_string()
                } else {
                    "Internal server error".to_string()
                }
            }
            _ => log_message.clone(),
        };

        // Always log the detailed error server-side
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let (status, code) = AppError::NotFound("record".into()).status_and_code();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "NOT_FOUND");

        let (status, code) = AppError::Redis(PoolError::CircuitOpen).status_and_code();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(code, "REDIS_ERROR");
    }

    #[test]
    fn test_dispatch_mapping() {
        let (status, _) =
            AppError::from(DispatchError::InvalidRequest("missing title")).status_and_code();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, code) = AppError::from(DispatchError::Gateway(
            crate::gateway::GatewayError::CircuitOpen,
        ))
        .status_and_code();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(code, "GATEWAY_ERROR");
    }

    #[test]
    fn test_into_response_status() {
        let response = AppError::Internal("boom".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
