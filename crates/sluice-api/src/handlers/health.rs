//! Health and liveness probes.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `healthy` while the process can answer
    pub status: &'static str,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Events waiting in the admission queue
    pub queue_depth: usize,
    /// Admission queue capacity
    pub queue_capacity: usize,
    /// Delivery workers
    pub workers: usize,
    /// False once shutdown has begun
    pub accepting: bool,
    /// Service version information
    pub version: &'static str,
}

/// Reports liveness together with queue occupancy.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let response = HealthResponse {
        status: "healthy",
        timestamp: state.clock.now_utc(),
        queue_depth: state.service.queue_depth(),
        queue_capacity: state.service.queue_capacity(),
        workers: state.service.worker_count(),
        accepting: state.service.is_accepting(),
        version: env!("CARGO_PKG_VERSION"),
    };

    (StatusCode::OK, Json(response))
}

/// Plain liveness probe.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}
