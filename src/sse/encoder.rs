//! SSE wire-frame encoding.
//!
//! Frame grammar:
//! `"id:" SP id LF "event:" SP type LF "retry:" SP ms LF ("data:" SP line LF)+ LF`
//! plus heartbeat comment frames `":" SP "heartbeat" SP ts LF LF`, which
//! are invisible to client event handlers but force intermediary proxies
//! to flush their buffers.

use crate::event::EventKind;

/// Per-session frame encoder.
///
/// Event ids are monotonically increasing integers starting at 0. Heartbeat
/// comments do not consume an id.
pub struct FrameEncoder {
    next_id: u64,
    retry_ms: u64,
}

impl FrameEncoder {
    pub fn new(retry_ms: u64) -> Self {
        Self {
            next_id: 0,
            retry_ms,
        }
    }

    /// Id the next encoded frame will carry.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Encode one event frame, consuming the next id.
    ///
    /// Fails (without consuming an id) if the payload cannot be serialized.
    pub fn encode(
        &mut self,
        kind: EventKind,
        data: &serde_json::Value,
    ) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(data)?;
        Ok(self.encode_raw(kind, &json))
    }

    /// Encode one event frame around an already-serialized payload.
    ///
    /// The payload is split on internal newlines; each line gets its own
    /// `data:` field per the SSE specification.
    pub fn encode_raw(&mut self, kind: EventKind, data: &str) -> String {
        let id = self.next_id;
        self.next_id += 1;

        let mut frame = String::with_capacity(data.len() + 48);
        frame.push_str(&format!("id: {}\n", id));
        frame.push_str(&format!("event: {}\n", kind.as_str()));
        frame.push_str(&format!("retry: {}\n", self.retry_ms));
        for line in data.split('\n') {
            frame.push_str("data: ");
            frame.push_str(line);
            frame.push('\n');
        }
        frame.push('\n');
        frame
    }

    /// Heartbeat comment frame. Does not consume an event id.
    pub fn heartbeat(unix_time: i64) -> String {
        format!(": heartbeat {}\n\n", unix_time)
    }
}
