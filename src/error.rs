//! Reconciler error types with HTTP status code mapping.
//!
//! [`ReconcileError`] is the central error type. Inside the pipeline it
//! marks transient or tick-level failures; at the HTTP edge each variant
//! maps to a status code and a structured JSON error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "a reconciliation pass is already in flight",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Error enum shared by the store, the synchronizers, and the API.
///
/// A correlation miss is deliberately absent: it is an expected outcome
/// and is reported as [`crate::sync::SyncOutcome::Unmatched`].
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                |
/// |-----------|-----------------|----------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request            |
/// | 2000–2999 | State           | 409 Conflict               |
/// | 3000–3999 | Server          | 500 Internal Server Error  |
/// | 4000–4999 | Upstream        | 502 Bad Gateway            |
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An event row's `data` column could not be decoded.
    #[error("malformed event {table}#{id}: {reason}")]
    MalformedEvent {
        /// Event table the row lives in.
        table: &'static str,
        /// Row ID.
        id: i64,
        /// Decoder message.
        reason: String,
    },

    /// A reconciliation pass is already running.
    #[error("a reconciliation pass is already in flight")]
    PassInFlight,

    /// Persistence layer failure (connection, query, commit).
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Token metadata could not be fetched.
    #[error("metadata fetch failed: {0}")]
    Metadata(String),

    /// A reconciliation pass was aborted by a failing stage.
    #[error("reconciliation pass failed in stage {stage}: {reason}")]
    PassFailed {
        /// Stage that failed.
        stage: String,
        /// Stage error message.
        reason: String,
    },

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReconcileError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::MalformedEvent { .. } => 1002,
            Self::PassInFlight => 2001,
            Self::Internal(_) => 3000,
            Self::Persistence(_) => 3001,
            Self::PassFailed { .. } => 3002,
            Self::Metadata(_) => 4001,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::MalformedEvent { .. } => StatusCode::BAD_REQUEST,
            Self::PassInFlight => StatusCode::CONFLICT,
            Self::Persistence(_) | Self::PassFailed { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Metadata(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ReconcileError {
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
