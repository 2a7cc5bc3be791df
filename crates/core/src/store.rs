//! TranscriptStore trait — delegated turn persistence.
//!
//! This core defines no on-disk format. Hosts supply a store (database,
//! file, in-memory) and the session reads and appends through it. The
//! conversation queue guarantees a single writer per conversation, so
//! implementations need no per-transcript locking for correctness.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::turn::{ConversationId, Turn};

/// Storage for conversation transcripts.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Load all turns for a conversation, oldest first. A conversation with
    /// no history yields an empty list, not an error.
    async fn load(&self, id: &ConversationId) -> std::result::Result<Vec<Turn>, StoreError>;

    /// Append one turn to a conversation's history.
    async fn append(
        &self,
        id: &ConversationId,
        turn: Turn,
    ) -> std::result::Result<(), StoreError>;
}
