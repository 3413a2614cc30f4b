//! Fixture builders for events.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use sluice_core::{Event, EventId};

/// Builder for [`Event`]s with sensible defaults.
///
/// # Example
///
/// ```
/// use sluice_testing::EventBuilder;
///
/// let event = EventBuilder::new().id("evt-1").event_type("user.signup").build();
/// assert_eq!(event.id.as_str(), "evt-1");
/// ```
#[derive(Debug, Clone)]
pub struct EventBuilder {
    id: Option<String>,
    event_type: String,
    timestamp: DateTime<Utc>,
    payload: Map<String, Value>,
}

impl EventBuilder {
    /// Creates a builder for a `test.event` with a generated id.
    pub fn new() -> Self {
        Self {
            id: None,
            event_type: "test.event".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now),
            payload: Map::new(),
        }
    }

    /// Sets the event id. Blank ids are replaced with a generated one.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the event type.
    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Adds a payload field.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Builds the event.
    pub fn build(self) -> Event {
        let id = self.id.and_then(|id| EventId::parse(id).ok()).unwrap_or_default();
        Event { id, event_type: self.event_type, timestamp: self.timestamp, payload: self.payload }
    }

    /// Builds `count` events with distinct generated ids.
    pub fn batch(count: usize) -> Vec<Event> {
        (0..count).map(|n| Self::new().field("seq", n).build()).collect()
    }
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self::new()
    }
}
