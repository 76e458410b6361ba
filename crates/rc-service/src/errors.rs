//! Room Controller error types.
//!
//! `RcError` is the service-level error returned by HTTP handlers and the
//! relational repositories. `CalloutError` is the authorization-path
//! taxonomy: every variant ends in a signed error response, never a grant.

use crate::crypto::SigningError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Generic text for access-token failures. The reason is logged at debug
/// level only.
pub const INVALID_ACCESS_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

#[derive(Debug, Error)]
pub enum RcError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Authorization callout failure.
///
/// The `Display` text of each variant is what the connecting server sees in
/// the signed response.
#[derive(Debug, Error)]
pub enum CalloutError {
    /// Request envelope or claims were malformed.
    #[error("invalid authorization request: {0}")]
    Validation(String),

    /// Access token invalid, expired, or issued for someone else.
    #[error("{INVALID_ACCESS_TOKEN_MESSAGE}")]
    Authentication,

    /// Room or user info absent from the room state store.
    #[error("User info not found for userId: {user_id}, roomId: {room_id}")]
    UserNotFound { room_id: String, user_id: String },

    /// The room state store itself failed.
    #[error("room state lookup failed: {0}")]
    Lookup(String),

    /// A per-category consumer could not be provisioned.
    #[error("failed to provision {category} permissions: {reason}")]
    Provisioning {
        category: &'static str,
        reason: String,
    },

    /// The assembled grant did not pass validation, or could not be signed.
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// The request was cancelled before a decision was reached.
    #[error("authorization request cancelled")]
    Cancelled,
}

impl CalloutError {
    /// Bounded label for metrics.
    pub fn metric_reason(&self) -> &'static str {
        match self {
            CalloutError::Validation(_) => "validation",
            CalloutError::Authentication => "authentication",
            CalloutError::UserNotFound { .. } | CalloutError::Lookup(_) => "lookup",
            CalloutError::Provisioning { .. } => "provisioning",
            CalloutError::Signing(_) => "signing",
            CalloutError::Cancelled => "cancelled",
        }
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

impl IntoResponse for RcError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            RcError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "An internal database error occurred".to_string(),
            ),
            RcError::Crypto(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CRYPTO_ERROR",
                "An internal cryptographic error occurred".to_string(),
            ),
            RcError::InvalidRequest(reason) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST", reason.clone())
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

impl From<sqlx::Error> for RcError {
    fn from(err: sqlx::Error) -> Self {
        RcError::Database(err.to_string())
    }
}
