//! Admission control and delivery workers for the sluice gateway.
//!
//! # Architecture
//!
//! An event travels through three stages:
//!
//! 1. **Rate gate** - [`RateGate::allow`] decides in constant time whether the
//!    caller may submit at all.
//! 2. **Admission** - [`IngestionService::admit`] makes one non-blocking
//!    attempt to place the event in a bounded queue, so backpressure is
//!    reported to the caller instead of absorbed.
//! 3. **Delivery** - a fixed pool of workers drains the queue in FIFO order
//!    and hands each event to the `DeliveryClient` under its own deadline.
//!
//! The [`bulk`] module feeds CSV files through the same delivery client
//! without going through the queue.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bulk;
pub mod error;
pub mod rate;
pub mod service;
mod worker;

pub use error::{AdmitError, IngestError, Result};
pub use rate::RateGate;
pub use service::{IngestionService, ServiceConfig};
