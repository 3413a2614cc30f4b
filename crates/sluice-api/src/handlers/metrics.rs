//! Prometheus exposition endpoint.

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use crate::AppState;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Renders all counters in the Prometheus text format.
pub async fn metrics(State(state): State<AppState>) -> Response {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], state.metrics.render_prometheus()).into_response()
}
