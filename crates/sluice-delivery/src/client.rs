//! Primary-then-dead-letter delivery.
//!
//! `DeliveryClient` writes each event once to the primary topic. If that
//! write fails (after the transport's own bounded retry), the same record is
//! written once to the dead-letter topic with an `error` header explaining
//! why. There is no retry loop at this level.

use std::sync::Arc;

use sluice_core::Event;
use tracing::{debug, warn};

use crate::{
    error::{DeliveryError, Result},
    transport::{LogMessage, LogTransport},
};

/// Header carrying the event id on every record.
pub const TRACE_ID_HEADER: &str = "trace_id";

/// Header carrying the primary failure reason on dead-letter records.
pub const ERROR_HEADER: &str = "error";

/// Where an event ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Written to the primary topic.
    Published,
    /// Written to the dead-letter topic after the primary write failed.
    DeadLettered {
        /// Why the primary write failed
        reason: String,
    },
}

impl DeliveryOutcome {
    /// Whether the event reached the primary topic.
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published)
    }
}

/// Publishes events to a primary transport with dead-letter fallback.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    primary: Arc<dyn LogTransport>,
    dead_letter: Arc<dyn LogTransport>,
}

impl DeliveryClient {
    /// Creates a client over the two destinations.
    pub fn new(primary: Arc<dyn LogTransport>, dead_letter: Arc<dyn LogTransport>) -> Self {
        Self { primary, dead_letter }
    }

    /// Delivers `event`, falling back to the dead-letter topic.
    ///
    /// The record key is the event id and the value is the JSON-encoded
    /// event. The primary is written exactly once; the dead-letter topic is
    /// written at most once and only after the primary failed.
    ///
    /// # Errors
    ///
    /// - `Serialization` if the event cannot be encoded (nothing is written)
    /// - `DeadLetterFailed` if both writes failed
    pub async fn publish(&self, event: &Event) -> Result<DeliveryOutcome> {
        let value =
            serde_json::to_vec(event).map_err(|e| DeliveryError::serialization(e.to_string()))?;
        let message = LogMessage::new(event.id.to_string(), value)
            .with_header(TRACE_ID_HEADER, event.id.as_str());

        let primary_error = match self.primary.write(&message).await {
            Ok(()) => {
                debug!(event_id = %event.id, topic = self.primary.destination(), "event published");
                return Ok(DeliveryOutcome::Published);
            },
            Err(error) => error,
        };

        let reason = primary_error.to_string();
        warn!(
            event_id = %event.id,
            error = %reason,
            category = %primary_error.category(),
            topic = self.dead_letter.destination(),
            "primary write failed, routing event to dead-letter topic"
        );

        let dead_letter_message = message.with_header(ERROR_HEADER, reason.clone());
        match self.dead_letter.write(&dead_letter_message).await {
            Ok(()) => Ok(DeliveryOutcome::DeadLettered { reason }),
            Err(error) => Err(DeliveryError::dead_letter_failed(reason, error.to_string())),
        }
    }

    /// Closes the primary, then the dead-letter transport.
    ///
    /// Both are always closed; the first error is returned.
    pub async fn close(&self) -> Result<()> {
        let primary = self.primary.close().await;
        let dead_letter = self.dead_letter.close().await;
        primary.and(dead_letter)
    }

    /// Primary topic name.
    pub fn primary_destination(&self) -> &str {
        self.primary.destination()
    }

    /// Dead-letter topic name.
    pub fn dead_letter_destination(&self) -> &str {
        self.dead_letter.destination()
    }
}
