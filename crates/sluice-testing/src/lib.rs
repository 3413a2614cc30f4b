//! Test infrastructure for deterministic testing.
//!
//! Provides a [`TestEnv`] wiring a controllable clock, a shared metrics
//! registry and in-memory primary/dead-letter transports, fixture builders
//! for events, and a polling helper for asserting on background workers.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

pub use sluice_core::TestClock;
use sluice_core::{Clock, Metrics};
pub use sluice_delivery::transport::mock::MemoryTransport;
use sluice_delivery::DeliveryClient;

pub mod fixtures;

pub use fixtures::EventBuilder;

/// Primary topic used by [`TestEnv`].
pub const PRIMARY_TOPIC: &str = "events";

/// Dead-letter topic used by [`TestEnv`].
pub const DEAD_LETTER_TOPIC: &str = "events-dlq";

/// Shared collaborators for one test.
///
/// Every accessor hands out clones that share state with the fields, so a
/// test can script the transports and read metrics after handing them to
/// the component under test.
#[derive(Debug, Clone)]
pub struct TestEnv {
    /// Deterministic clock
    pub clock: TestClock,
    /// Metrics registry
    pub metrics: Arc<Metrics>,
    /// Primary destination
    pub primary: Arc<MemoryTransport>,
    /// Dead-letter destination
    pub dead_letter: Arc<MemoryTransport>,
}

impl TestEnv {
    /// Creates a fresh environment.
    pub fn new() -> Self {
        Self {
            clock: TestClock::new(),
            metrics: Arc::new(Metrics::new()),
            primary: Arc::new(MemoryTransport::new(PRIMARY_TOPIC)),
            dead_letter: Arc::new(MemoryTransport::new(DEAD_LETTER_TOPIC)),
        }
    }

    /// Delivery client over the in-memory transports.
    pub fn client(&self) -> DeliveryClient {
        DeliveryClient::new(self.primary.clone(), self.dead_letter.clone())
    }

    /// The clock as a trait object.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    /// Shared metrics handle.
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls `condition` until it holds, panicking after five seconds.
///
/// Background workers run on real tasks, so tests that observe their side
/// effects wait with this rather than sleeping a fixed amount.
pub async fn eventually(condition: impl Fn() -> bool) {
    eventually_within(Duration::from_secs(5), condition).await;
}

/// Polls `condition` until it holds, panicking after `timeout`.
pub async fn eventually_within(timeout: Duration, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within {timeout:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
