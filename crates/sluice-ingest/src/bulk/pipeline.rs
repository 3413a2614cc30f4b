//! CSV bulk import.
//!
//! A blocking reader streams rows into a bounded channel; async workers turn
//! each row into a `bulk_import` event and publish it through the same
//! [`DeliveryClient`] the HTTP path uses. A collector tracks the contiguous
//! completed-row watermark and checkpoints it, so a restarted import skips
//! rows that already reached a terminal outcome.

use std::{collections::BTreeSet, io::Read, sync::Arc, time::Duration};

use serde::Serialize;
use serde_json::{Map, Value};
use sluice_core::{Clock, Event, Metrics};
use sluice_delivery::{DeliveryClient, DeliveryOutcome};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::source::FileSource;
use crate::{
    error::{IngestError, Result},
    rate::RateGate,
};

/// Event type given to every imported row.
pub const BULK_IMPORT_EVENT_TYPE: &str = "bulk_import";

/// Settings for one import run.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportConfig {
    /// File to import, as understood by the [`FileSource`].
    pub path: String,
    /// Number of concurrent publishing workers.
    pub workers: usize,
    /// Row channel capacity and checkpoint interval.
    pub batch_size: usize,
    /// Rows per second, or 0 for unlimited.
    pub rate_limit: f64,
    /// Whether the first record names the columns.
    pub has_headers: bool,
}

impl ImportConfig {
    /// Config for `path` with default sizing.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), workers: 4, batch_size: 100, rate_limit: 0.0, has_headers: true }
    }
}

/// Summary of an import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Data records seen, including skipped and malformed ones.
    pub rows_read: u64,
    /// Records before the resume offset.
    pub rows_skipped: u64,
    /// Rows written to the primary topic.
    pub published: u64,
    /// Rows written to the dead-letter topic.
    pub dead_lettered: u64,
    /// Rows that could not be delivered anywhere.
    pub failed: u64,
    /// Records the CSV reader rejected.
    pub malformed: u64,
    /// Final checkpointed offset.
    pub checkpoint: u64,
    /// Whether the file was marked completed.
    pub completed: bool,
}

#[derive(Debug)]
struct Row {
    index: u64,
    payload: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Published,
    DeadLettered,
    Failed,
    Malformed,
}

#[derive(Debug, Default)]
struct ReadStats {
    rows_read: u64,
    rows_skipped: u64,
}

/// Imports CSV files through a [`DeliveryClient`].
#[derive(Debug, Clone)]
pub struct ImportPipeline {
    source: Arc<dyn FileSource>,
    client: DeliveryClient,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
}

impl ImportPipeline {
    /// Creates a pipeline.
    pub fn new(
        source: Arc<dyn FileSource>,
        client: DeliveryClient,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { source, client, metrics, clock }
    }

    /// Imports `config.path`, resuming from its last checkpoint.
    ///
    /// Cancelling `cancel` stops reading and publishing; rows already handed
    /// to a worker finish, progress is checkpointed, and the file is not
    /// marked completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the file cannot be
    /// opened or read, or a checkpoint cannot be stored.
    pub async fn run(&self, config: &ImportConfig, cancel: CancellationToken) -> Result<ImportReport> {
        if config.workers == 0 {
            return Err(IngestError::configuration("import workers must be at least 1"));
        }
        if config.batch_size == 0 {
            return Err(IngestError::configuration("import batch size must be at least 1"));
        }
        if !config.rate_limit.is_finite() || config.rate_limit < 0.0 {
            return Err(IngestError::configuration("import rate limit must be a non-negative number"));
        }

        let path = config.path.as_str();
        let resume_from = self.source.resume_offset(path).await?;
        let input = self.source.open(path).await?;

        info!(
            path,
            workers = config.workers,
            batch_size = config.batch_size,
            resume_from,
            "starting bulk import"
        );

        let (row_tx, row_rx) = mpsc::channel(config.batch_size);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let reader = {
            let done_tx = done_tx.clone();
            let cancel = cancel.clone();
            let has_headers = config.has_headers;
            tokio::task::spawn_blocking(move || {
                read_rows(input, has_headers, resume_from, &row_tx, &done_tx, &cancel)
            })
        };

        let gate = (config.rate_limit > 0.0)
            .then(|| Arc::new(RateGate::with_clock(config.rate_limit, 1, Arc::clone(&self.clock))));
        let rows = Arc::new(Mutex::new(row_rx));
        let workers: Vec<JoinHandle<()>> = (0..config.workers)
            .map(|worker_id| {
                tokio::spawn(self.clone().publish_rows(
                    worker_id,
                    Arc::clone(&rows),
                    done_tx.clone(),
                    gate.clone(),
                    cancel.clone(),
                ))
            })
            .collect();
        drop(rows);
        drop(done_tx);

        let mut report = ImportReport::default();
        let mut watermark = resume_from;
        let mut last_checkpoint = resume_from;
        let mut finished_ahead = BTreeSet::new();
        let checkpoint_every = u64::try_from(config.batch_size).unwrap_or(u64::MAX);

        while let Some((index, outcome)) = done_rx.recv().await {
            match outcome {
                RowOutcome::Published => report.published += 1,
                RowOutcome::DeadLettered => report.dead_lettered += 1,
                RowOutcome::Failed => report.failed += 1,
                RowOutcome::Malformed => report.malformed += 1,
            }

            finished_ahead.insert(index);
            while finished_ahead.remove(&watermark) {
                watermark += 1;
            }

            if watermark - last_checkpoint >= checkpoint_every {
                self.source.checkpoint(path, watermark).await?;
                last_checkpoint = watermark;
            }
        }

        for (worker_id, handle) in workers.into_iter().enumerate() {
            if let Err(join_error) = handle.await {
                error!(worker_id, error = %join_error, "import worker panicked");
            }
        }

        if watermark > last_checkpoint {
            self.source.checkpoint(path, watermark).await?;
        }
        report.checkpoint = watermark;

        let stats = reader
            .await
            .map_err(|e| IngestError::import(format!("CSV reader task failed: {e}")))??;
        report.rows_read = stats.rows_read;
        report.rows_skipped = stats.rows_skipped;

        if cancel.is_cancelled() {
            warn!(path, checkpoint = watermark, "bulk import cancelled");
        } else {
            self.source.mark_completed(path).await?;
            report.completed = true;
            info!(
                path,
                rows_read = report.rows_read,
                published = report.published,
                dead_lettered = report.dead_lettered,
                failed = report.failed,
                malformed = report.malformed,
                "bulk import completed"
            );
        }

        Ok(report)
    }

    async fn publish_rows(
        self,
        worker_id: usize,
        rows: Arc<Mutex<mpsc::Receiver<Row>>>,
        done: mpsc::UnboundedSender<(u64, RowOutcome)>,
        gate: Option<Arc<RateGate>>,
        cancel: CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = async { rows.lock().await.recv().await } => next,
            };
            let Some(row) = next else {
                break;
            };

            if let Some(gate) = &gate {
                if !self.wait_for_token(gate, &cancel).await {
                    break;
                }
            }

            let event = Event::new(BULK_IMPORT_EVENT_TYPE, self.clock.now_utc(), row.payload);
            self.metrics.received.inc();
            let outcome = match self.client.publish(&event).await {
                Ok(DeliveryOutcome::Published) => {
                    self.metrics.published.inc();
                    RowOutcome::Published
                },
                Ok(DeliveryOutcome::DeadLettered { .. }) => {
                    self.metrics.dead_lettered.inc();
                    RowOutcome::DeadLettered
                },
                Err(error) => {
                    self.metrics.failed.inc();
                    error!(
                        worker_id,
                        row = row.index,
                        event_id = %event.id,
                        error = %error,
                        category = %error.category(),
                        "failed to publish imported row"
                    );
                    RowOutcome::Failed
                },
            };

            if done.send((row.index, outcome)).is_err() {
                break;
            }
        }
    }

    /// Waits for the gate to admit one row. Returns false if cancelled first.
    async fn wait_for_token(&self, gate: &RateGate, cancel: &CancellationToken) -> bool {
        let interval = Duration::from_secs_f64((1.0 / gate.rate()).min(1.0));
        while !gate.allow() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                () = self.clock.sleep(interval) => {},
            }
        }
        true
    }
}

fn read_rows(
    input: Box<dyn Read + Send>,
    has_headers: bool,
    resume_from: u64,
    rows: &mpsc::Sender<Row>,
    done: &mpsc::UnboundedSender<(u64, RowOutcome)>,
    cancel: &CancellationToken,
) -> Result<ReadStats> {
    let mut reader = csv::ReaderBuilder::new().has_headers(has_headers).from_reader(input);
    let headers = if has_headers { Some(reader.headers()?.clone()) } else { None };
    let mut stats = ReadStats::default();

    for (index, record) in (0_u64..).zip(reader.records()) {
        if cancel.is_cancelled() {
            break;
        }
        stats.rows_read += 1;

        if index < resume_from {
            stats.rows_skipped += 1;
            continue;
        }

        let record = match record {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                warn!(row = index, error = %e, "skipping malformed CSV record");
                if done.send((index, RowOutcome::Malformed)).is_err() {
                    break;
                }
                continue;
            },
        };

        let payload = match &headers {
            Some(headers) => headers
                .iter()
                .zip(record.iter())
                .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
                .collect(),
            None => {
                let values = record.iter().map(|v| Value::String(v.to_string())).collect();
                Map::from_iter([("data".to_string(), Value::Array(values))])
            },
        };

        if rows.blocking_send(Row { index, payload }).is_err() {
            break;
        }
    }

    Ok(stats)
}
