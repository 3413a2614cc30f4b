//! Core domain types shared by every sluice crate.
//!
//! Provides the event model that flows through the gateway, the clock
//! abstraction used for deterministic timing in tests, and the metrics
//! registry that the admission path and delivery workers report into.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod metrics;
pub mod models;
pub mod time;

pub use error::{CoreError, Result};
pub use metrics::{Metrics, MetricsSnapshot};
pub use models::{Event, EventId, EventRequest};
pub use time::{Clock, RealClock, TestClock};
