//! In-memory transcript storage.
//!
//! The default store for tests and single-process deployments. Hosts that
//! need durability supply their own `TranscriptStore` instead.

use std::collections::HashMap;

use async_trait::async_trait;
use colloquy_core::error::StoreError;
use colloquy_core::store::TranscriptStore;
use colloquy_core::turn::{ConversationId, Turn};
use tokio::sync::RwLock;

/// A `TranscriptStore` backed by a process-local map.
#[derive(Default)]
pub struct MemoryTranscriptStore {
    transcripts: RwLock<HashMap<ConversationId, Vec<Turn>>>,
}

impl MemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a conversation's history entirely (conversation reset).
    pub async fn clear(&self, id: &ConversationId) {
        self.transcripts.write().await.remove(id);
    }

    /// Number of turns stored for a conversation.
    pub async fn len(&self, id: &ConversationId) -> usize {
        self.transcripts
            .read()
            .await
            .get(id)
            .map(|t| t.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl TranscriptStore for MemoryTranscriptStore {
    async fn load(&self, id: &ConversationId) -> std::result::Result<Vec<Turn>, StoreError> {
        Ok(self
            .transcripts
            .read()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(
        &self,
        id: &ConversationId,
        turn: Turn,
    ) -> std::result::Result<(), StoreError> {
        self.transcripts
            .write()
            .await
            .entry(id.clone())
            .or_default()
            .push(turn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_conversation_loads_empty_not_error() {
        let store = MemoryTranscriptStore::new();
        let turns = store.load(&ConversationId::from("nobody")).await.unwrap();
        assert!(turns.is_empty());
    }

    #[tokio::test]
    async fn append_then_load_preserves_order() {
        let store = MemoryTranscriptStore::new();
        let id = ConversationId::from("c1");

        store.append(&id, Turn::user("first")).await.unwrap();
        store.append(&id, Turn::assistant("second")).await.unwrap();

        let turns = store.load(&id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "first");
        assert_eq!(turns[1].content, "second");
    }

    #[tokio::test]
    async fn clear_removes_history() {
        let store = MemoryTranscriptStore::new();
        let id = ConversationId::from("c1");

        store.append(&id, Turn::user("gone soon")).await.unwrap();
        store.clear(&id).await;
        assert_eq!(store.len(&id).await, 0);
    }

    #[tokio::test]
    async fn conversations_are_isolated() {
        let store = MemoryTranscriptStore::new();
        store
            .append(&ConversationId::from("a"), Turn::user("for a"))
            .await
            .unwrap();

        let other = store.load(&ConversationId::from("b")).await.unwrap();
        assert!(other.is_empty());
    }
}
