//! Append-only record of the displayable exchange.

use crate::playback::ClipId;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

/// A reference to an audio frame handed to playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioRef {
    pub clip_id: ClipId,
    pub mime: String,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Audio(AudioRef),
}

/// One entry of the log. Entries are never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub origin: Origin,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

/// Ordered sequence of messages. Only inbound messages are recorded; text the
/// user sends is not echoed into the log.
#[derive(Debug, Default, Clone, Serialize)]
pub struct MessageLog {
    entries: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a remote entry stamped with the current time.
    pub fn push_remote(&mut self, payload: Payload) -> &Message {
        self.entries.push(Message {
            origin: Origin::Remote,
            payload,
            timestamp: Utc::now(),
        });
        // The vector was just pushed to, so it cannot be empty.
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn last(&self) -> Option<&Message> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
