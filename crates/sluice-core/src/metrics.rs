//! In-process metrics registry.
//!
//! Every counter is a plain atomic so the admission path can record without
//! taking a lock. The registry is built once at startup and shared as
//! `Arc<Metrics>`; `GET /metrics` renders it in the Prometheus text format.

use std::{
    collections::BTreeMap,
    fmt::{self, Write as _},
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

use serde::Serialize;

/// Upper bounds, in milliseconds, of the latency histogram buckets.
pub const LATENCY_BUCKETS_MS: [u64; 10] = [1, 2, 4, 8, 16, 32, 64, 128, 256, 512];

/// Monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Adds one.
    pub fn inc(&self) {
        self.add(1);
    }

    /// Adds `n`.
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Value that can go up and down.
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    /// Adds one.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    /// Subtracts one.
    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }

    /// Overwrites the value.
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Release);
    }

    /// Current value.
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Fixed-bucket latency histogram over [`LATENCY_BUCKETS_MS`].
///
/// Buckets are stored non-cumulatively and summed at render time; the last
/// slot holds observations above the largest bound.
#[derive(Debug, Default)]
pub struct Histogram {
    buckets: [AtomicU64; LATENCY_BUCKETS_MS.len() + 1],
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl Histogram {
    /// Records one observation.
    pub fn observe(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let index = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| micros <= bound * 1_000)
            .unwrap_or(LATENCY_BUCKETS_MS.len());

        self.buckets[index].fetch_add(1, Ordering::Relaxed);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of observations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of all observations in milliseconds.
    pub fn sum_ms(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000.0
    }

    /// Cumulative count per bucket bound, in bound order.
    pub fn cumulative(&self) -> Vec<(u64, u64)> {
        let mut running = 0;
        LATENCY_BUCKETS_MS
            .iter()
            .zip(&self.buckets)
            .map(|(bound, bucket)| {
                running += bucket.load(Ordering::Relaxed);
                (*bound, running)
            })
            .collect()
    }
}

/// Request counter labelled by HTTP status code.
#[derive(Debug, Default)]
pub struct StatusCounter(Mutex<BTreeMap<u16, u64>>);

impl StatusCounter {
    /// Counts one response with `status`.
    pub fn inc(&self, status: u16) {
        let mut counts = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *counts.entry(status).or_default() += 1;
    }

    /// Count for a single status.
    pub fn get(&self, status: u16) -> u64 {
        self.snapshot().get(&status).copied().unwrap_or(0)
    }

    /// Copy of every status count.
    pub fn snapshot(&self) -> BTreeMap<u16, u64> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

/// Gateway-wide metrics.
///
/// Each admitted event increments `received` once and, when delivery ends,
/// exactly one of `published`, `dead_lettered` or `failed`.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Events accepted for delivery, from HTTP admission or bulk import.
    pub received: Counter,
    /// Events written to the primary destination.
    pub published: Counter,
    /// Events diverted to the dead-letter destination.
    pub dead_lettered: Counter,
    /// Events lost after both destinations failed, or that hit the delivery
    /// deadline.
    pub failed: Counter,
    /// Events admitted but not yet taken by a worker.
    pub queue_depth: Gauge,
    /// Admission-to-outcome latency.
    pub latency: Histogram,
    /// HTTP responses by status code.
    pub http_requests: StatusCounter,
}

impl Metrics {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy for JSON reporting and assertions.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_received: self.received.get(),
            events_published: self.published.get(),
            events_dead_lettered: self.dead_lettered.get(),
            events_failed: self.failed.get(),
            queue_size: self.queue_depth.get(),
            latency_observations: self.latency.count(),
            http_requests: self.http_requests.snapshot(),
        }
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(2048);
        // Writing into a String cannot fail.
        let _ = self.write_prometheus(&mut out);
        out
    }

    fn write_prometheus(&self, out: &mut String) -> fmt::Result {
        write_counter(out, "events_received_total", "Events accepted for delivery.", self.received.get())?;
        write_counter(out, "events_published_total", "Events written to the primary topic.", self.published.get())?;
        write_counter(
            out,
            "events_dead_lettered_total",
            "Events written to the dead-letter topic.",
            self.dead_lettered.get(),
        )?;
        write_counter(out, "events_failed_total", "Events that could not be delivered anywhere.", self.failed.get())?;

        writeln!(out, "# HELP ingest_queue_size Events waiting for a worker.")?;
        writeln!(out, "# TYPE ingest_queue_size gauge")?;
        writeln!(out, "ingest_queue_size {}", self.queue_depth.get())?;

        writeln!(out, "# HELP ingest_latency_ms Admission to delivery outcome latency in milliseconds.")?;
        writeln!(out, "# TYPE ingest_latency_ms histogram")?;
        for (bound, cumulative) in self.latency.cumulative() {
            writeln!(out, "ingest_latency_ms_bucket{{le=\"{bound}\"}} {cumulative}")?;
        }
        writeln!(out, "ingest_latency_ms_bucket{{le=\"+Inf\"}} {}", self.latency.count())?;
        writeln!(out, "ingest_latency_ms_sum {}", self.latency.sum_ms())?;
        writeln!(out, "ingest_latency_ms_count {}", self.latency.count())?;

        writeln!(out, "# HELP http_requests_total HTTP responses by status code.")?;
        writeln!(out, "# TYPE http_requests_total counter")?;
        for (status, count) in self.http_requests.snapshot() {
            writeln!(out, "http_requests_total{{status=\"{status}\"}} {count}")?;
        }
        Ok(())
    }
}

fn write_counter(out: &mut String, name: &str, help: &str, value: u64) -> fmt::Result {
    writeln!(out, "# HELP {name} {help}")?;
    writeln!(out, "# TYPE {name} counter")?;
    writeln!(out, "{name} {value}")
}

/// Serializable view of [`Metrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Events accepted for delivery.
    pub events_received: u64,
    /// Events written to the primary destination.
    pub events_published: u64,
    /// Events written to the dead-letter destination.
    pub events_dead_lettered: u64,
    /// Events lost.
    pub events_failed: u64,
    /// Current queue depth.
    pub queue_size: i64,
    /// Number of latency observations.
    pub latency_observations: u64,
    /// HTTP responses by status code.
    pub http_requests: BTreeMap<u16, u64>,
}

impl MetricsSnapshot {
    /// Events that reached a terminal outcome.
    pub fn completed(&self) -> u64 {
        self.events_published + self.events_dead_lettered + self.events_failed
    }
}
