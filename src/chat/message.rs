//! Chat message wire type.
//!
//! The same JSON encoding is used on the socket, on the broker and in the
//! history store, so a message survives any hop unchanged.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A chat message.
///
/// Identity is structural: there is no message ID, and ordering comes only
/// from arrival order within a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    /// Sender's display name.
    pub username: String,
    /// Message text.
    pub text: String,
    /// Room the message belongs to.
    pub room: String,
    /// Timestamp as sent by the author (RFC 3339 for server-built messages).
    pub timestamp: String,
}

impl ChatMessage {
    /// Create a new message stamped with the current time.
    pub fn new(
        username: impl Into<String>,
        text: impl Into<String>,
        room: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            text: text.into(),
            room: room.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Stamp the current time if the author sent no timestamp.
    pub fn ensure_timestamp(&mut self) {
        if self.timestamp.trim().is_empty() {
            self.timestamp = Utc::now().to_rfc3339();
        }
    }

    /// Whether the text is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Serialize to the wire encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from the wire encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
