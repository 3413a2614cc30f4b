//! HTTP request handlers.
//!
//! Error responses share one shape, `{"error":{"code":…,"message":…}}`, built
//! by [`error_response`].

pub mod health;
pub mod ingest;
pub mod metrics;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
pub use health::{health_check, liveness_check};
pub use ingest::ingest_event;
pub use metrics::metrics;
use serde::Serialize;

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details including code and message
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Machine-readable code such as `rate_limited`
    pub code: String,
    /// Human-readable error description
    pub message: String,
}

pub(crate) fn error_response(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
) -> Response {
    let body = ErrorResponse {
        error: ErrorDetail { code: code.to_string(), message: message.into() },
    };

    (status, Json(body)).into_response()
}
