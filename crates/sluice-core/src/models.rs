//! Event model and strongly-typed identifiers.
//!
//! `EventRequest` is what arrives on the wire: every field is optional.
//! `Event` is what the core handles: the id is non-empty and the timestamp is
//! always set. The only way from one to the other is
//! [`EventRequest::into_event`], so the invariant holds by construction.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Seconds since the Unix epoch of `0001-01-01T00:00:00Z`, the zero instant
/// that many clients emit for an unset time.
const ZERO_INSTANT_SECS: i64 = -62_135_596_800;

/// Strongly-typed event identifier.
///
/// Never empty. Caller-supplied ids are kept verbatim; missing ids are
/// replaced with a UUID v4 at the boundary.
///
/// # Example
///
/// ```
/// use sluice_core::EventId;
///
/// let generated = EventId::new();
/// assert!(!generated.as_str().is_empty());
///
/// assert!(EventId::parse("").is_err());
/// assert_eq!(EventId::parse("evt-1").unwrap().as_str(), "evt-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId(String);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps a caller-supplied identifier.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidEvent` if the identifier is empty or only
    /// whitespace.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CoreError::invalid_event("event id must not be empty"));
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EventId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<EventId> for String {
    fn from(id: EventId) -> Self {
        id.0
    }
}

/// The unit of work carried from admission to the durable log.
///
/// The payload is opaque: the gateway serializes it whole and never branches
/// on its contents or on `event_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier, also used as the delivery key.
    pub id: EventId,
    /// Free-form classification tag.
    #[serde(rename = "type")]
    pub event_type: String,
    /// When the event happened, or when it was admitted if the caller did not
    /// say.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary structured data.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    /// Creates an event with a generated id.
    pub fn new(
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: Map<String, Value>,
    ) -> Self {
        Self { id: EventId::new(), event_type: event_type.into(), timestamp, payload }
    }
}

/// Event body as decoded from the wire.
///
/// Every field may be missing. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EventRequest {
    /// Optional caller-supplied id.
    #[serde(default)]
    pub id: Option<String>,
    /// Optional classification tag.
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    /// Optional event time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Optional payload object.
    #[serde(default)]
    pub payload: Option<Map<String, Value>>,
}

impl EventRequest {
    /// Completes the request into a core event.
    ///
    /// A missing or blank id is replaced with a fresh UUID, and a missing
    /// timestamp (or the zero instant `0001-01-01T00:00:00Z`) is replaced with
    /// `now`.
    pub fn into_event(self, now: DateTime<Utc>) -> Event {
        let id = self.id.and_then(|id| EventId::parse(id).ok()).unwrap_or_default();

        let timestamp = match self.timestamp {
            Some(ts) if ts.timestamp() != ZERO_INSTANT_SECS => ts,
            _ => now,
        };

        Event {
            id,
            event_type: self.event_type.unwrap_or_default(),
            timestamp,
            payload: self.payload.unwrap_or_default(),
        }
    }
}
