//! The dispatcher — the glue between a flushed batch and an agent turn.
//!
//! Implements `BatchSink`: each flushed batch becomes one queued unit of
//! work that runs the agent session and hands the final text to the
//! host's `ResponseSink`.

use std::sync::Arc;

use async_trait::async_trait;
use colloquy_agent::{AgentSession, TurnInput};
use colloquy_core::turn::ConversationId;
use colloquy_ingress::{BatchSink, ConversationQueue, FlushedBatch};
use tracing::debug;

/// Receives final answer text for outbound delivery. The transport owns
/// chunking and formatting; this core produces one logical string.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn deliver(&self, conversation: &ConversationId, text: String);
}

/// Turns flushed batches into queued agent turns.
pub struct Dispatcher {
    session: Arc<AgentSession>,
    queue: Arc<ConversationQueue>,
    responses: Arc<dyn ResponseSink>,
}

impl Dispatcher {
    pub fn new(
        session: Arc<AgentSession>,
        queue: Arc<ConversationQueue>,
        responses: Arc<dyn ResponseSink>,
    ) -> Self {
        Self {
            session,
            queue,
            responses,
        }
    }
}

#[async_trait]
impl BatchSink for Dispatcher {
    async fn on_batch_ready(&self, batch: FlushedBatch) {
        let conversation = batch.conversation.clone();
        let combined = batch.items.join("\n");
        debug!(
            conversation = %conversation,
            items = batch.items.len(),
            "Dispatching batch as one turn"
        );

        let session = self.session.clone();
        let responses = self.responses.clone();
        let id = conversation.clone();
        self.queue.enqueue(conversation, async move {
            let text = session.run(TurnInput::new(id.clone(), combined)).await?;
            responses.deliver(&id, text).await;
            Ok(())
        });
    }
}
