//! Delivery worker that drains the admission queue.

use std::{sync::Arc, time::Duration, time::Instant};

use sluice_core::{Clock, Event, Metrics};
use sluice_delivery::{DeliveryClient, DeliveryOutcome};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// An admitted event waiting for delivery.
#[derive(Debug)]
pub(crate) struct QueuedEvent {
    pub(crate) event: Event,
    pub(crate) admitted_at: Instant,
}

pub(crate) type SharedQueue = Arc<Mutex<mpsc::Receiver<QueuedEvent>>>;

/// One consumer of the shared queue.
///
/// Runs until the queue is closed and empty, or until the abort token is
/// cancelled.
pub(crate) struct IngestWorker {
    id: usize,
    queue: SharedQueue,
    client: DeliveryClient,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    delivery_timeout: Duration,
    abort: CancellationToken,
}

impl IngestWorker {
    pub(crate) fn new(
        id: usize,
        queue: SharedQueue,
        client: DeliveryClient,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
        delivery_timeout: Duration,
        abort: CancellationToken,
    ) -> Self {
        Self { id, queue, client, metrics, clock, delivery_timeout, abort }
    }

    pub(crate) async fn run(self) {
        info!(worker_id = self.id, "ingest worker starting");

        loop {
            let next = tokio::select! {
                biased;
                () = self.abort.cancelled() => {
                    warn!(worker_id = self.id, "ingest worker aborted");
                    break;
                },
                next = async { self.queue.lock().await.recv().await } => next,
            };

            let Some(queued) = next else {
                break;
            };
            self.deliver(queued).await;
        }

        info!(worker_id = self.id, "ingest worker stopped");
    }

    async fn deliver(&self, queued: QueuedEvent) {
        self.metrics.queue_depth.dec();
        let QueuedEvent { event, admitted_at } = queued;

        let result = tokio::time::timeout(self.delivery_timeout, self.client.publish(&event)).await;
        self.metrics.latency.observe(self.clock.now().saturating_duration_since(admitted_at));

        match result {
            Ok(Ok(DeliveryOutcome::Published)) => {
                self.metrics.published.inc();
                debug!(worker_id = self.id, event_id = %event.id, "event delivered");
            },
            Ok(Ok(DeliveryOutcome::DeadLettered { reason })) => {
                self.metrics.dead_lettered.inc();
                warn!(
                    worker_id = self.id,
                    event_id = %event.id,
                    error = %reason,
                    "event routed to dead-letter topic"
                );
            },
            Ok(Err(error)) => {
                self.metrics.failed.inc();
                error!(
                    worker_id = self.id,
                    event_id = %event.id,
                    error = %error,
                    category = %error.category(),
                    "event delivery failed"
                );
            },
            Err(_elapsed) => {
                self.metrics.failed.inc();
                error!(
                    worker_id = self.id,
                    event_id = %event.id,
                    timeout_ms = u64::try_from(self.delivery_timeout.as_millis()).unwrap_or(u64::MAX),
                    category = "timeout",
                    "event delivery exceeded deadline"
                );
            },
        }
    }
}
