//! Opaque signal payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A single queued message.
///
/// The payload is an opaque JSON value, or the "no data" marker (a signal sent
/// without data). The marker is distinct from an empty queue: a queue holding
/// one no-data payload still counts as one delivered message, and its
/// listeners are invoked without an argument.
///
/// Stored as JSON `null` for the marker, so `Value::Null` is normalized to it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Option<JsonValue>);

impl Payload {
    /// The "no data" marker.
    pub fn no_data() -> Self {
        Self(None)
    }

    pub fn new(value: impl Into<JsonValue>) -> Self {
        match value.into() {
            JsonValue::Null => Self(None),
            v => Self(Some(v)),
        }
    }

    pub fn is_no_data(&self) -> bool {
        self.0.is_none()
    }

    pub fn data(&self) -> Option<&JsonValue> {
        self.0.as_ref()
    }
}

impl From<JsonValue> for Payload {
    fn from(value: JsonValue) -> Self {
        Self::new(value)
    }
}

impl From<Option<JsonValue>> for Payload {
    fn from(value: Option<JsonValue>) -> Self {
        value.map(Self::new).unwrap_or_default()
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl From<u64> for Payload {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Self::no_data()
    }
}
