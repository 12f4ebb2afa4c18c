//! Gateway error types with HTTP status code and wire code mapping.
//!
//! [`GatewayError`] is the central error type for the gateway. Each variant
//! maps to a specific HTTP status code, a structured JSON error response for
//! REST callers, and a snake_case code used in WebSocket `error` frames.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::ConnectionId;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1002,
///     "message": "invalid pattern: empty segment in \"task..created\"",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`GatewayError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category           | HTTP Status                 |
/// |-----------|--------------------|-----------------------------|
/// | 1000–1999 | Validation/Protocol| 400 Bad Request             |
/// | 2000–2999 | State/Not Found    | 404 Not Found / 409 Conflict|
/// | 3000–3999 | Server             | 500 Internal Server Error   |
/// | 4000–4999 | Identity/Access    | 401 / 403                   |
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Subscription pattern is empty or malformed.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// Malformed or unsupported protocol frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Credential was rejected by the identity collaborator.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Privileged action attempted before authenticating.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Authenticated, but not allowed to perform the action.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// An event handler returned an error.
    #[error("handler {handler} failed: {message}")]
    Handler {
        /// Handler name as reported by the handler.
        handler: String,
        /// Failure description.
        message: String,
    },

    /// An event handler exceeded its soft deadline.
    #[error("handler {handler} exceeded {timeout_ms} ms")]
    HandlerTimeout {
        /// Handler name as reported by the handler.
        handler: String,
        /// Deadline that was exceeded.
        timeout_ms: u64,
    },

    /// A middleware vetoed the emission.
    #[error("event vetoed by {middleware}: {reason}")]
    Vetoed {
        /// Name of the middleware that vetoed.
        middleware: String,
        /// Reason supplied by the middleware.
        reason: String,
    },

    /// Connection with the given ID is not registered.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::InvalidPattern(_) => 1002,
            Self::Protocol(_) => 1003,
            Self::Vetoed { .. } => 2001,
            Self::ConnectionNotFound(_) => 2002,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::Handler { .. } => 3002,
            Self::HandlerTimeout { .. } => 3003,
            Self::Authentication(_) => 4001,
            Self::NotAuthenticated => 4002,
            Self::Forbidden(_) => 4003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::InvalidPattern(_) | Self::Protocol(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Vetoed { .. } => StatusCode::CONFLICT,
            Self::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
            Self::Authentication(_) | Self::NotAuthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Handler { .. }
            | Self::HandlerTimeout { .. }
            | Self::PersistenceError(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the snake_case code carried in WebSocket `error` frames.
    #[must_use]
    pub const fn wire_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::InvalidPattern(_) => "invalid_request",
            Self::Protocol(_) => "protocol_error",
            Self::Authentication(_) => "auth_failed",
            Self::NotAuthenticated => "not_authenticated",
            Self::Forbidden(_) => "forbidden",
            Self::Vetoed { .. } => "vetoed",
            Self::ConnectionNotFound(_) => "not_found",
            Self::Handler { .. }
            | Self::HandlerTimeout { .. }
            | Self::PersistenceError(_)
            | Self::Internal(_) => "internal_error",
        }
    }

    /// Shorthand for a [`GatewayError::Handler`] failure.
    #[must_use]
    pub fn handler(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            handler: handler.into(),
            message: message.into(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn codes_fall_in_documented_ranges() {
        assert_eq!(GatewayError::InvalidPattern("x".into()).error_code(), 1002);
        assert_eq!(GatewayError::NotAuthenticated.error_code(), 4002);
        assert_eq!(
            GatewayError::handler("audit", "boom").error_code(),
            3002
        );
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            GatewayError::Authentication("bad".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::Vetoed {
                middleware: "name_validation".into(),
                reason: "empty".into(),
            }
            .status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn wire_codes_for_protocol_errors() {
        assert_eq!(GatewayError::NotAuthenticated.wire_code(), "not_authenticated");
        assert_eq!(
            GatewayError::Protocol("malformed JSON".into()).wire_code(),
            "protocol_error"
        );
    }

    #[test]
    fn handler_error_display_names_handler() {
        let err = GatewayError::handler("audit_log", "disk full");
        assert_eq!(err.to_string(), "handler audit_log failed: disk full");
    }
}
