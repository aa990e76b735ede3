//! Error types for the Sync API.
//!
//! Every failure reaches the device as
//! `{"code": "...", "message": "...", "field": "..."}` with a matching
//! status code. `field` is present for validation failures only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use binaa_sync::SyncError;

/// What the device sees when a request fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub field: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a str>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code,
            message: message.into(),
            field: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "Internal server error",
        )
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.status, self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match &err {
            SyncError::Validation(v) => ApiError {
                status: StatusCode::BAD_REQUEST,
                code: "validation_failed",
                message: v.to_string(),
                field: Some(v.field().to_string()),
            },
            SyncError::UnknownTable(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "unknown_table", err.to_string())
            }
            SyncError::DeviceInactive(_) => {
                ApiError::new(StatusCode::FORBIDDEN, "device_inactive", err.to_string())
            }
            _ if err.is_forbidden() => {
                ApiError::new(StatusCode::FORBIDDEN, "forbidden", err.to_string())
            }
            _ if err.is_not_found() => {
                ApiError::new(StatusCode::NOT_FOUND, "not_found", err.to_string())
            }
            _ if err.is_state_conflict() => {
                ApiError::new(StatusCode::CONFLICT, "conflict", err.to_string())
            }
            _ if err.is_retryable() => {
                error!(error = %err, "Transient storage failure");
                ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "Storage is busy, retry later",
                )
            }
            _ => {
                error!(error = %err, "Request failed");
                ApiError::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code,
            message: &self.message,
            field: self.field.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}
