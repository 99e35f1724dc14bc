//! Room history storage.
//!
//! Each room owns an append-only log of serialized messages. New connections
//! get the full log replayed before they see live traffic.

mod sqlite;

pub use sqlite::SqliteHistory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::chat::ChatMessage;
use crate::Result;

/// Append/read log keyed by room.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a serialized message to the room's log.
    async fn append(&self, room: &str, payload: &[u8]) -> Result<()>;

    /// Read the room's full log in append order.
    ///
    /// A room that was never written returns an empty log.
    async fn read_all(&self, room: &str) -> Result<Vec<Vec<u8>>>;
}

/// In-memory history store.
#[derive(Default)]
pub struct MemoryHistory {
    rooms: RwLock<HashMap<String, Vec<Vec<u8>>>>,
}

impl MemoryHistory {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append(&self, room: &str, payload: &[u8]) -> Result<()> {
        self.rooms
            .write()
            .await
            .entry(room.to_string())
            .or_default()
            .push(payload.to_vec());
        Ok(())
    }

    async fn read_all(&self, room: &str) -> Result<Vec<Vec<u8>>> {
        Ok(self.rooms.read().await.get(room).cloned().unwrap_or_default())
    }
}

/// Typed view over a [`HistoryStore`] that speaks [`ChatMessage`].
#[derive(Clone)]
pub struct RoomHistory {
    store: Arc<dyn HistoryStore>,
}

impl RoomHistory {
    /// Wrap a store.
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// Append a message to its room's log.
    pub async fn append(&self, msg: &ChatMessage) -> Result<()> {
        let payload = msg.to_bytes()?;
        self.store.append(&msg.room, &payload).await
    }

    /// Load a room's log as messages.
    ///
    /// Entries that no longer decode are skipped with a warning.
    pub async fn load(&self, room: &str) -> Result<Vec<ChatMessage>> {
        let entries = self.store.read_all(room).await?;
        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            match ChatMessage::from_bytes(&entry) {
                Ok(msg) => messages.push(msg),
                Err(e) => tracing::warn!(room, error = %e, "Skipping undecodable history entry"),
            }
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_history_empty_room() {
        let store = MemoryHistory::new();
        assert!(store.read_all("nowhere").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_history_append_order() {
        let store = MemoryHistory::new();
        store.append("general", b"one").await.unwrap();
        store.append("general", b"two").await.unwrap();
        store.append("other", b"x").await.unwrap();
        store.append("general", b"three").await.unwrap();

        let log = store.read_all("general").await.unwrap();
        assert_eq!(log, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
        assert_eq!(store.read_all("other").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_room_history_roundtrip() {
        let history = RoomHistory::new(Arc::new(MemoryHistory::new()));
        let first = ChatMessage::new("alice", "hello", "general");
        let second = ChatMessage::new("bob", "hi alice", "general");
        history.append(&first).await.unwrap();
        history.append(&second).await.unwrap();

        let loaded = history.load("general").await.unwrap();
        assert_eq!(loaded, vec![first, second]);
    }

    #[tokio::test]
    async fn test_room_history_skips_corrupt_entries() {
        let store = Arc::new(MemoryHistory::new());
        store.append("general", b"garbage").await.unwrap();
        let history = RoomHistory::new(store);
        let msg = ChatMessage::new("alice", "hello", "general");
        history.append(&msg).await.unwrap();

        let loaded = history.load("general").await.unwrap();
        assert_eq!(loaded, vec![msg]);
    }
}
