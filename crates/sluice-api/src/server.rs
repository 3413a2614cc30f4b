//! HTTP server setup and request routing.
//!
//! Requests pass through tracing and a per-request timeout before reaching
//! the handlers. Shutdown stops accepting connections and lets in-flight
//! requests finish; draining the ingestion queue is the caller's job once
//! [`start_server`] returns.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    routing::{get, post},
    Router,
};
use sluice_core::{Clock, Metrics};
use sluice_ingest::{IngestionService, RateGate};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::handlers;

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Queue and worker pool that events are admitted into.
    pub service: Arc<IngestionService>,
    /// Admission rate limiter.
    pub gate: Arc<RateGate>,
    /// Process-wide counters.
    pub metrics: Arc<Metrics>,
    /// Source of receive timestamps.
    pub clock: Arc<dyn Clock>,
    /// Value of the `Retry-After` header on queue-full responses.
    pub retry_after_seconds: u64,
}

/// Creates the router with all routes and middleware.
///
/// ```no_run
/// # use std::time::Duration;
/// # use sluice_api::{create_router, AppState};
/// # fn build(state: AppState) {
/// let app = create_router(state, Duration::from_secs(10));
/// # }
/// ```
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/live", get(handlers::liveness_check))
        .route("/metrics", get(handlers::metrics));

    let api_routes = Router::new().route("/events", post(handlers::ingest_event));

    Router::new()
        .merge(health_routes)
        .merge(api_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `app` on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound.
pub async fn start_server<F>(app: Router, addr: SocketAddr, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("HTTP server stopped accepting requests");
    Ok(())
}

/// Waits for CTRL+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}
