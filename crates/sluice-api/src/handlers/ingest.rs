//! Event ingestion handler.
//!
//! Order of checks: rate gate, body decode, admission. Nothing is queued
//! unless all three pass, and every response is counted by status code.

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use sluice_core::EventRequest;
use sluice_ingest::AdmitError;
use tracing::{debug, instrument, warn};

use super::error_response;
use crate::AppState;

/// Header carrying the id of an accepted event.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Response from successful ingestion.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Always `accepted`
    pub status: &'static str,
    /// Id of the admitted event, generated when the caller sent none
    pub id: String,
}

/// Accepts one event for asynchronous delivery.
///
/// Returns 202 once the event is queued. Delivery happens later; its outcome
/// only shows up in metrics and logs.
#[instrument(name = "ingest_event", skip_all, fields(body_len = body.len()))]
pub async fn ingest_event(State(state): State<AppState>, body: Bytes) -> Response {
    let response = admit(&state, &body);
    state.metrics.http_requests.inc(response.status().as_u16());
    response
}

fn admit(state: &AppState, body: &[u8]) -> Response {
    if !state.gate.allow() {
        debug!("request rejected by rate limit");
        return error_response(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "rate limit exceeded");
    }

    let request: EventRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "rejected malformed event body");
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                format!("invalid request body: {e}"),
            );
        },
    };

    let event = request.into_event(state.clock.now_utc());
    let id = event.id.to_string();

    match state.service.admit(event) {
        Ok(()) => {
            debug!(event_id = %id, "event accepted");
            accepted(id)
        },
        Err(AdmitError::QueueFull) => {
            warn!(event_id = %id, "queue full, rejecting event");
            let mut response = error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "queue_full",
                "ingestion queue is full",
            );
            response
                .headers_mut()
                .insert("Retry-After", HeaderValue::from(state.retry_after_seconds));
            response
        },
        Err(AdmitError::Closed) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "shutting_down",
            "service is shutting down",
        ),
    }
}

fn accepted(id: String) -> Response {
    let header = HeaderValue::from_str(&id).ok();
    let mut response =
        (StatusCode::ACCEPTED, Json(IngestResponse { status: "accepted", id })).into_response();

    // Caller ids that are not valid header text are still accepted, just
    // without the echo header.
    if let Some(value) = header {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
