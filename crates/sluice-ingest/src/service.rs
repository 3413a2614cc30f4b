//! Bounded admission queue with a fixed pool of delivery workers.
//!
//! `admit` is a single non-blocking insert attempt: the caller learns
//! immediately whether the event was queued. Workers take events in FIFO
//! order and hand each to the [`DeliveryClient`] under its own deadline.
//!
//! `shutdown` closes admission first, so any `admit` that starts after it
//! observes `Closed`, and then waits for workers to drain what was already
//! queued.

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use sluice_core::{Clock, Event, Metrics};
use sluice_delivery::DeliveryClient;
use tokio::{
    sync::{mpsc, mpsc::error::TrySendError, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::{AdmitError, IngestError, Result},
    worker::{IngestWorker, QueuedEvent},
};

/// Sizing for the queue and worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Number of delivery workers.
    pub worker_count: usize,
    /// Maximum number of events waiting for a worker.
    pub queue_capacity: usize,
    /// Deadline for delivering one event, including dead-letter fallback.
    pub delivery_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { worker_count: 10, queue_capacity: 1000, delivery_timeout: Duration::from_secs(5) }
    }
}

/// Admission queue and the workers that drain it.
pub struct IngestionService {
    sender: RwLock<Option<mpsc::Sender<QueuedEvent>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    config: ServiceConfig,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    abort: CancellationToken,
}

impl IngestionService {
    /// Creates the queue and spawns `config.worker_count` workers.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Configuration` if the worker count or queue
    /// capacity is zero.
    pub fn start(
        config: ServiceConfig,
        client: DeliveryClient,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if config.worker_count == 0 {
            return Err(IngestError::configuration("worker count must be at least 1"));
        }
        if config.queue_capacity == 0 {
            return Err(IngestError::configuration("queue capacity must be at least 1"));
        }

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let queue = Arc::new(Mutex::new(receiver));
        let abort = CancellationToken::new();

        info!(
            worker_count = config.worker_count,
            queue_capacity = config.queue_capacity,
            "spawning ingest workers"
        );

        let handles = (0..config.worker_count)
            .map(|worker_id| {
                let worker = IngestWorker::new(
                    worker_id,
                    Arc::clone(&queue),
                    client.clone(),
                    Arc::clone(&metrics),
                    Arc::clone(&clock),
                    config.delivery_timeout,
                    abort.clone(),
                );
                tokio::spawn(worker.run())
            })
            .collect();

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(handles),
            config,
            metrics,
            clock,
            abort,
        })
    }

    /// Attempts to queue `event` without waiting.
    ///
    /// On success the `received` counter and queue depth have been
    /// incremented before this returns.
    ///
    /// # Errors
    ///
    /// - `AdmitError::QueueFull` if the queue is at capacity
    /// - `AdmitError::Closed` once shutdown has begun
    pub fn admit(&self, event: Event) -> std::result::Result<(), AdmitError> {
        let guard = self.sender.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(sender) = guard.as_ref() else {
            return Err(AdmitError::Closed);
        };

        let permit = sender.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => AdmitError::QueueFull,
            TrySendError::Closed(()) => AdmitError::Closed,
        })?;

        self.metrics.received.inc();
        self.metrics.queue_depth.inc();
        permit.send(QueuedEvent { event, admitted_at: self.clock.now() });
        Ok(())
    }

    /// Closes admission and waits for every queued event to be delivered and
    /// every worker to exit.
    ///
    /// There is no internal deadline; callers wanting one wrap this in a
    /// timeout. Calling it again waits for the first call to finish.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::WorkerPanic` for the first worker that panicked.
    /// All workers are joined regardless.
    pub async fn shutdown(&self) -> Result<()> {
        let sender = self.sender.write().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if sender.is_some() {
            info!(queue_depth = self.queue_depth(), "admission closed, draining queue");
        }
        drop(sender);

        let mut workers = self.workers.lock().await;
        let mut first_error = None;
        for (worker_id, handle) in workers.drain(..).enumerate() {
            if let Err(join_error) = handle.await {
                error!(worker_id, error = %join_error, "ingest worker panicked during shutdown");
                first_error.get_or_insert(IngestError::WorkerPanic {
                    worker_id,
                    error: join_error.to_string(),
                });
            }
        }

        info!("ingestion service shutdown completed");
        first_error.map_or(Ok(()), Err)
    }

    /// Events admitted but not yet taken by a worker.
    pub fn queue_depth(&self) -> usize {
        usize::try_from(self.metrics.queue_depth.get()).unwrap_or(0)
    }

    /// Configured queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.config.queue_capacity
    }

    /// Configured number of workers.
    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// Whether `admit` can currently succeed apart from capacity.
    pub fn is_accepting(&self) -> bool {
        self.sender.read().unwrap_or_else(|poisoned| poisoned.into_inner()).is_some()
    }
}

impl std::fmt::Debug for IngestionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionService")
            .field("config", &self.config)
            .field("accepting", &self.is_accepting())
            .finish_non_exhaustive()
    }
}

impl Drop for IngestionService {
    fn drop(&mut self) {
        let active = self.workers.get_mut().iter().filter(|h| !h.is_finished()).count();

        if active > 0 && !self.abort.is_cancelled() {
            error!(
                active_workers = active,
                "IngestionService dropped with active workers, cancelling without draining"
            );
            self.abort.cancel();
            warn!("call shutdown() before dropping to deliver queued events");
        }
    }
}
