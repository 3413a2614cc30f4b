//! Sluice event ingestion gateway.
//!
//! Main entry point. Loads configuration, wires the delivery client, and
//! either serves HTTP or runs a one-shot bulk import when `IMPORT_FILE` is
//! set.

use std::sync::Arc;

use anyhow::{Context, Result};
use sluice_api::{create_router, server::shutdown_signal, start_server, AppState, Config};
use sluice_core::{Clock, Metrics, RealClock};
use sluice_delivery::{DeliveryClient, HttpLogTransport};
use sluice_ingest::{
    bulk::{ImportConfig, ImportPipeline, LocalFileSource},
    IngestionService, RateGate,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config)?;

    info!(
        host = %config.host,
        port = config.http_port,
        endpoints = %config.log_endpoints,
        topic = %config.log_topic,
        dlq_topic = %config.log_dlq_topic,
        workers = config.worker_pool_size,
        queue_size = config.queue_size,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let metrics = Arc::new(Metrics::new());
    let client = create_delivery_client(&config, Arc::clone(&clock))?;
    info!(
        primary = client.primary_destination(),
        dead_letter = client.dead_letter_destination(),
        "Delivery client ready"
    );

    let outcome = match config.to_import_config() {
        Some(import) => run_import(&config, import, client.clone(), metrics, clock).await,
        None => run_server(&config, client.clone(), metrics, clock).await,
    };

    if let Err(e) = client.close().await {
        warn!(error = %e, "Failed to close delivery client cleanly");
    }

    info!("Sluice shutdown complete");
    outcome
}

/// Initializes tracing from `LOG_LEVEL` and `LOG_FORMAT`; `RUST_LOG` wins
/// when set.
fn init_tracing(config: &Config) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log filter")?;

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs() {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true).with_thread_ids(true)).init();
    }
    Ok(())
}

fn create_delivery_client(config: &Config, clock: Arc<dyn Clock>) -> Result<DeliveryClient> {
    let primary = HttpLogTransport::with_clock(
        config.to_transport_config(&config.log_topic),
        Arc::clone(&clock),
    )
    .context("Failed to create primary transport")?;
    let dead_letter =
        HttpLogTransport::with_clock(config.to_transport_config(&config.log_dlq_topic), clock)
            .context("Failed to create dead-letter transport")?;

    Ok(DeliveryClient::new(Arc::new(primary), Arc::new(dead_letter)))
}

async fn run_server(
    config: &Config,
    client: DeliveryClient,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
) -> Result<()> {
    let service = Arc::new(
        IngestionService::start(
            config.to_service_config(),
            client,
            Arc::clone(&metrics),
            Arc::clone(&clock),
        )
        .context("Failed to start ingestion service")?,
    );
    let gate = Arc::new(RateGate::with_clock(
        config.rate_limit_rps,
        config.rate_limit_burst,
        Arc::clone(&clock),
    ));

    let state = AppState {
        service: Arc::clone(&service),
        gate,
        metrics,
        clock,
        retry_after_seconds: config.retry_after_seconds,
    };
    let app = create_router(state, config.request_timeout());
    let addr = config.parse_server_addr()?;

    let served = start_server(app, addr, shutdown_signal()).await;
    if let Err(e) = &served {
        error!(error = %e, "Server failed");
    }

    info!(queued = service.queue_depth(), "Draining ingestion queue");
    service.shutdown().await.context("Ingestion workers did not stop cleanly")?;

    served.context("HTTP server failed")
}

async fn run_import(
    config: &Config,
    import: ImportConfig,
    client: DeliveryClient,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
) -> Result<()> {
    let source = Arc::new(LocalFileSource::new(&config.import_state_dir));
    let pipeline = ImportPipeline::new(source, client, metrics, clock);

    let cancel = CancellationToken::new();
    let signal = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    info!(path = %import.path, workers = import.workers, "Starting bulk import");
    let report = pipeline.run(&import, cancel).await;
    signal.abort();

    let report = report.context("Bulk import failed")?;
    info!(
        rows_read = report.rows_read,
        rows_skipped = report.rows_skipped,
        published = report.published,
        dead_lettered = report.dead_lettered,
        failed = report.failed,
        malformed = report.malformed,
        checkpoint = report.checkpoint,
        completed = report.completed,
        "Bulk import finished"
    );
    Ok(())
}
