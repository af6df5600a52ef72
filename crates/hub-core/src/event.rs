//! Device events flowing through the event queue

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type identifier (e.g. "temperature_change")
///
/// Rules are matched against events by exact string equality on this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    /// Create a new event type
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    /// Get the event type as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl PartialEq<str> for EventType {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An observed occurrence from a device or sensor
///
/// Events are immutable once created. This is also the wire shape of a
/// queue message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier (ULID)
    pub id: String,

    /// Device or sensor that produced the event
    pub device_id: String,

    /// The type of event
    pub event_type: EventType,

    /// Named numeric measurements (e.g. "temperature" -> 29.0)
    #[serde(default, alias = "data")]
    pub measurements: BTreeMap<String, f64>,

    /// When the event was observed
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event with a fresh id and the current timestamp
    pub fn new(
        device_id: impl Into<String>,
        event_type: impl Into<EventType>,
        measurements: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            id: crate::new_id(),
            device_id: device_id.into(),
            event_type: event_type.into(),
            measurements,
            timestamp: Utc::now(),
        }
    }

    /// Add a measurement
    pub fn with_measurement(mut self, name: impl Into<String>, value: f64) -> Self {
        self.measurements.insert(name.into(), value);
        self
    }

    /// Look up a measurement by name
    pub fn measurement(&self, name: &str) -> Option<f64> {
        self.measurements.get(name).copied()
    }
}

/// Ingestion payload for a new event
///
/// ```json
/// {
///   "device_id": "sensor-1",
///   "event_type": "temperature_change",
///   "measurements": { "temperature": 29.0 },
///   "timestamp": "2026-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub device_id: String,
    pub event_type: EventType,
    #[serde(default, alias = "data")]
    pub measurements: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewEvent {
    /// Assign an id, filling in the timestamp if the producer left it out
    pub fn into_event(self) -> Event {
        Event {
            id: crate::new_id(),
            device_id: self.device_id,
            event_type: self.event_type,
            measurements: self.measurements,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}
