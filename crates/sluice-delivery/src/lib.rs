//! Delivery of admitted events to a durable log.
//!
//! # Architecture
//!
//! Delivery has two layers:
//!
//! 1. **Transport** - a [`LogTransport`] appends one record to one topic and
//!    owns the bounded retry for that write ([`RetryPolicy`]).
//! 2. **Client** - a [`DeliveryClient`] writes each event once to the primary
//!    transport and, if that fails, once to the dead-letter transport with the
//!    failure reason attached.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sluice_delivery::{DeliveryClient, HttpLogTransport, HttpTransportConfig};
//!
//! # fn example() -> sluice_delivery::Result<()> {
//! let primary = HttpLogTransport::new(HttpTransportConfig::default())?;
//! let dead_letter = HttpLogTransport::new(HttpTransportConfig {
//!     topic: "events-dlq".to_string(),
//!     ..Default::default()
//! })?;
//! let client = DeliveryClient::new(Arc::new(primary), Arc::new(dead_letter));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod retry;
pub mod transport;

pub use client::{DeliveryClient, DeliveryOutcome};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use retry::RetryPolicy;
pub use transport::{HttpLogTransport, HttpTransportConfig, LogMessage, LogTransport};
