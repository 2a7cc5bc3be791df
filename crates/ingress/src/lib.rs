//! Ingress — everything between a channel transport and the agent.
//!
//! Two pieces:
//!
//! - [`MessageBatcher`] buffers rapid-fire inbound messages per batching
//!   key and flushes them as one combined batch after a quiet period,
//!   bounded by a hard ceiling.
//! - [`ConversationQueue`] serializes work per conversation so a batch
//!   never runs while the previous turn is still in flight, while
//!   unrelated conversations proceed concurrently.

pub mod batcher;
pub mod queue;

pub use batcher::{BatchSink, FlushedBatch, MessageBatcher};
pub use queue::ConversationQueue;
