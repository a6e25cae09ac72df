//! Unified API error handling with structured responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::AuthError;
use crate::blueprint::McpConfigError;
use crate::queue::QueueError;
use crate::session::StoreError;

/// API error type with stable error codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        message: String,
        missing: Vec<String>,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Session is terminal: {0}")]
    SessionTerminal(String),

    #[error("Session is not finished: {0}")]
    NotFinished(String),

    #[error("Run is already terminal: {0}")]
    AlreadyTerminal(String),

    #[error("Unknown runner: {0}")]
    UnknownRunner(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unknown_runner(msg: impl Into<String>) -> Self {
        Self::UnknownRunner(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::UnknownRunner(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::InvalidConfig { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_)
            | Self::SessionTerminal(_)
            | Self::NotFinished(_)
            | Self::AlreadyTerminal(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Conflict(_) => "CONFLICT",
            Self::SessionTerminal(_) => "SESSION_TERMINAL",
            Self::NotFinished(_) => "NOT_FINISHED",
            Self::AlreadyTerminal(_) => "ALREADY_TERMINAL",
            Self::UnknownRunner(_) => "UNKNOWN_RUNNER",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::InvalidConfig { missing, .. } if !missing.is_empty() => {
                Some(serde_json::json!({ "missing": missing }))
            }
            _ => None,
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            _ => {
                tracing::debug!(error_code = code, message = %message, "client error");
            }
        }

        let body = ErrorResponse {
            error: message,
            code,
            details: self.details(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApiError::NotFound(format!("session {id} not found")),
            StoreError::BindConflict(id) => {
                ApiError::Conflict(format!("session {id} is bound to a different executor"))
            }
            StoreError::SessionTerminal(id) => ApiError::SessionTerminal(id),
            StoreError::NotFinished(id) => ApiError::NotFinished(id),
            StoreError::Database(e) => ApiError::Internal(e.to_string()),
            StoreError::Internal(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotFound(id) => ApiError::NotFound(format!("run {id} not found")),
            QueueError::AlreadyTerminal { run_id, status } => {
                ApiError::AlreadyTerminal(format!("run {run_id} is already {status}"))
            }
            QueueError::RunnerMismatch { run_id } => {
                ApiError::Conflict(format!("run {run_id} is assigned to a different runner"))
            }
            QueueError::InvalidTransition { run_id, from, to } => {
                ApiError::Conflict(format!("run {run_id} cannot go from {from} to {to}"))
            }
            QueueError::Database(e) => ApiError::Internal(e.to_string()),
            QueueError::Internal(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials
            | AuthError::InvalidAuthHeader
            | AuthError::InvalidToken(_)
            | AuthError::TokenExpired => ApiError::Unauthorized(err.to_string()),
            AuthError::InvalidCredentials => ApiError::Forbidden("invalid credentials".to_string()),
            AuthError::Internal(msg) => {
                warn!(message = %msg, "auth backend error");
                ApiError::Internal(msg)
            }
        }
    }
}

impl From<McpConfigError> for ApiError {
    fn from(err: McpConfigError) -> Self {
        match err {
            McpConfigError::MissingKeys { missing } => ApiError::InvalidConfig {
                message: "required MCP configuration is missing".to_string(),
                missing,
            },
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::not_found("").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::bad_request("").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::conflict("").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::SessionTerminal(String::new()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::NotFinished(String::new()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::unknown_runner("").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Unauthorized(String::new()).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_store_error_mapping() {
        let err: ApiError = StoreError::BindConflict("sess_1".to_string()).into();
        assert_eq!(err.error_code(), "CONFLICT");

        let err: ApiError = StoreError::SessionTerminal("sess_1".to_string()).into();
        assert_eq!(err.error_code(), "SESSION_TERMINAL");

        let err: ApiError = StoreError::NotFinished("sess_1".to_string()).into();
        assert_eq!(err.error_code(), "NOT_FINISHED");
    }

    #[test]
    fn test_invalid_config_details() {
        let err = ApiError::InvalidConfig {
            message: "missing".to_string(),
            missing: vec!["tracker.api_token".to_string()],
        };
        let details = err.details().unwrap();
        assert_eq!(details["missing"][0], "tracker.api_token");
    }
}
