//! Append-only local chat log.
//!
//! Sent messages are appended optimistically when handed to the transport,
//! with no acknowledgement (at-most-once delivery). Display order is append
//! order; there is no merged timeline across peers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::ChatPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    #[serde(flatten)]
    pub message: ChatPayload,
    pub direction: Direction,
}

#[derive(Debug, Default)]
pub struct ChatLog {
    entries: Vec<ChatEntry>,
    /// Last id handed out locally; ids never go backwards even if the clock does.
    last_id: i64,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an outgoing message, or `None` if `text` is blank.
    pub fn compose(&mut self, text: &str, sender: &str, now: DateTime<Utc>) -> Option<ChatPayload> {
        if text.trim().is_empty() {
            return None;
        }
        let id = now.timestamp_millis().max(self.last_id);
        self.last_id = id;
        Some(ChatPayload {
            id,
            text: text.to_string(),
            sender: sender.to_string(),
            timestamp: now,
        })
    }

    pub fn record_sent(&mut self, message: ChatPayload) -> &ChatEntry {
        self.push(message, Direction::Sent)
    }

    pub fn record_received(&mut self, message: ChatPayload) -> &ChatEntry {
        self.push(message, Direction::Received)
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, message: ChatPayload, direction: Direction) -> &ChatEntry {
        self.entries.push(ChatEntry { message, direction });
        &self.entries[self.entries.len() - 1]
    }
}
