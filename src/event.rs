use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of event carried on the notification stream.
///
/// `Connected`, `Ping` and `Error` are synthesized by the stream session
/// itself; `Notification` events originate from producers via the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Initial handshake event emitted when a session opens
    Connected,
    /// A notification produced by the CRM collaborator
    Notification,
    /// Keep-alive application event
    Ping,
    /// Session-level failure surfaced to the client before termination
    Error,
}

impl EventKind {
    /// Wire name used in the SSE `event:` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Notification => "notification",
            EventKind::Ping => "ping",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire-level message unit delivered to stream sessions.
///
/// Immutable once constructed; never persisted by this service. The payload
/// is an already-serialized representation handed over by the collaborator
/// that owns the notification row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event kind (serialized as `type` to match the pub/sub wire format)
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Opaque JSON payload
    pub data: serde_json::Value,
    /// When the event was built by the broker
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event stamped with the current time.
    pub fn new(kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }
}
