//! Signal relay error types.
//!
//! Errors reach clients in exactly two ways: as an HTTP status before the
//! WebSocket upgrade, or as a close code after it. No error payload is ever
//! sent over an established signaling socket. Internal details are logged
//! server-side only.

use crate::protocol::CLOSE_AUTH_FAILED;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Signal relay error type.
///
/// Connection-level mapping:
/// - `InvalidToken`, `Forbidden`: close with `CLOSE_AUTH_FAILED` (4001)
/// - `MalformedMessage`, `Delivery`: per-message, the connection stays open
/// - `Redis`: logged, cross-worker fan-out degraded
#[derive(Debug, Error)]
pub enum RelayError {
    /// Redis operation failed.
    #[error("Redis error: {0}")]
    Redis(String),

    /// Credential missing, malformed, expired or unverifiable.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Authenticated principal lacks the privilege the role requires.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Inbound frame was not a JSON object with a string `type`.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Writing to one local connection failed.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Request parameters rejected before upgrade.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl RelayError {
    /// Returns the WebSocket close code for errors that terminate a connection.
    ///
    /// Returns `None` for per-message errors, which never close the socket.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            RelayError::InvalidToken(_) | RelayError::Forbidden(_) => Some(CLOSE_AUTH_FAILED),
            _ => None,
        }
    }

    /// Returns the HTTP status code for pre-upgrade rejections.
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::Redis(_) | RelayError::Delivery(_) => 500,
            RelayError::InvalidToken(_) => 401,
            RelayError::Forbidden(_) => 403,
            RelayError::MalformedMessage(_) | RelayError::BadRequest(_) => 400,
        }
    }

    /// Bounded label for the `relay_auth_rejections_total` metric.
    pub fn rejection_reason(&self) -> &'static str {
        match self {
            RelayError::InvalidToken(_) => "authentication",
            RelayError::Forbidden(_) => "authorization",
            RelayError::BadRequest(_) | RelayError::MalformedMessage(_) => "bad_request",
            _ => "internal",
        }
    }
}

impl From<redis::RedisError> for RelayError {
    fn from(err: redis::RedisError) -> Self {
        RelayError::Redis(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            RelayError::Redis(err) => {
                tracing::error!(target: "relay.bus", error = %err, "Bus operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            RelayError::Delivery(err) => {
                tracing::error!(target: "relay.http", error = %err, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            RelayError::InvalidToken(_) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                "The access token is invalid or expired".to_string(),
            ),
            RelayError::Forbidden(_) => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Insufficient privileges".to_string(),
            ),
            RelayError::MalformedMessage(reason) | RelayError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}
