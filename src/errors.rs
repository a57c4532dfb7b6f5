// ABOUTME: Centralized error handling for the MCPbox control plane
// ABOUTME: Defines the AppError type, stable error codes, and HTTP response mapping

//! # Unified Error Handling
//!
//! Every fallible surface in the crate returns [`AppError`] (or a more
//! specific error that converts into it). Each error carries a stable
//! [`ErrorCode`] used for the HTTP status mapping and for clients that want
//! to branch on the kind of failure without parsing message text.
//!
//! User-visible messages on internal failures stay terse by design; full
//! detail goes to the activity log and tracing output instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Stable error codes used throughout the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    /// Authentication is required but missing or invalid.
    AuthFailed,
    /// Too many failed authentication attempts from one source.
    AuthRateLimited,
    /// Caller is authenticated but not permitted to perform the operation.
    PermissionDenied,
    /// Input validation failed.
    InvalidInput,
    /// The requested resource does not exist.
    NotFound,
    /// A resource with the same identity already exists.
    AlreadyExists,
    /// A matching workflow request is already pending review.
    AlreadyPending,
    /// An entity is not in the state the operation requires.
    InvalidState,
    /// The sandbox or another upstream dependency failed.
    UpstreamError,
    /// The sandbox circuit breaker is open.
    UpstreamUnavailable,
    /// A stored secret could not be used.
    SecretUnavailable,
    /// Database operation failed.
    DatabaseError,
    /// Anything else; details are logged, not returned.
    InternalError,
}

impl ErrorCode {
    /// HTTP status this code maps to.
    #[must_use]
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::InvalidInput => StatusCode::BAD_REQUEST,
            Self::AuthFailed | Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::AuthRateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::AlreadyExists | Self::AlreadyPending | Self::InvalidState => {
                StatusCode::CONFLICT
            }
            Self::UpstreamError => StatusCode::BAD_GATEWAY,
            Self::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::SecretUnavailable | Self::DatabaseError | Self::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Application error: a code plus a user-visible message.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
}

impl AppError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Opaque authentication failure. The message never reveals whether the
    /// credential was missing or wrong.
    #[must_use]
    pub fn auth_failed() -> Self {
        Self::new(ErrorCode::AuthFailed, "Authentication failed")
    }

    #[must_use]
    pub fn auth_rate_limited() -> Self {
        Self::new(
            ErrorCode::AuthRateLimited,
            "Too many failed authentication attempts",
        )
    }

    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message)
    }

    #[must_use]
    pub fn already_pending(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyPending, message)
    }

    /// Internal failure with a terse user-visible message. Callers log the
    /// full detail before constructing this.
    #[must_use]
    pub fn internal() -> Self {
        Self::new(ErrorCode::InternalError, "Internal server error")
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "database operation failed");
        Self::new(ErrorCode::DatabaseError, "Database operation failed")
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorCode,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.code.http_status();
        let body = ErrorBody {
            error: self.code,
            detail: self.message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_message_is_opaque() {
        let err = AppError::auth_failed();
        assert_eq!(err.message, "Authentication failed");
        assert_eq!(err.code.http_status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn rate_limited_maps_to_429() {
        assert_eq!(
            ErrorCode::AuthRateLimited.http_status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
