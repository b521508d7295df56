use std::time::Duration;

use axum::Json;
use axum::{
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::utils::error_codes;

/// Failure talking to the key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("store is unreachable")]
    Unreachable,
    #[error("corrupt value under {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// The remote store could not serve a request (network error, timeout or
/// protocol error). Consumed by the failover layer, never shown to clients.
#[derive(Debug, thiserror::Error)]
#[error("remote backend unavailable: {0}")]
pub struct BackendUnavailable(#[from] pub StoreError);

/// Invalid startup configuration. Fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    QuotaExceeded { limit: u32, retry_after: u64 },
    BadRequest(String),
    Forbidden,
    InternalServerError,
}

#[derive(Serialize)]
struct ErrorResponse {
    code: i32,
    error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::QuotaExceeded { limit, retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorResponse {
                    code: error_codes::RATE_LIMIT,
                    error_message: format!(
                        "Rate limit of {} requests exceeded, retry in {} seconds",
                        limit, retry_after
                    ),
                    reason: Some("rate_limit_exceeded"),
                    retry_after: Some(retry_after),
                },
            ),
            AppError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    code: error_codes::VALIDATION_ERROR,
                    error_message: message,
                    reason: None,
                    retry_after: None,
                },
            ),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                ErrorResponse {
                    code: error_codes::PERMISSION_DENIED,
                    error_message: "Admin role required".to_string(),
                    reason: None,
                    retry_after: None,
                },
            ),
            AppError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    code: error_codes::INTERNAL_ERROR,
                    error_message: "Internal server error".to_string(),
                    reason: None,
                    retry_after: None,
                },
            ),
        };

        let retry_after = body.retry_after;
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
