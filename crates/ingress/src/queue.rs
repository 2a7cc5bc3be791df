//! Per-conversation work serialization.
//!
//! At most one unit of work runs per conversation at a time; later work
//! for the same conversation queues FIFO behind it. Different
//! conversations never wait on one another. A failed item is logged and
//! published, never allowed to stall the rest of its queue.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use std::panic::AssertUnwindSafe;

use chrono::Utc;
use colloquy_core::error::Result;
use colloquy_core::event::{EventBus, RuntimeEvent};
use colloquy_core::turn::ConversationId;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, warn};

/// Queue depth beyond which a conversation is probably wedged.
const DEPTH_WARN_THRESHOLD: usize = 32;

type Work = BoxFuture<'static, Result<()>>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Work>,
    running: bool,
}

/// Serializes work per conversation while letting unrelated conversations
/// run concurrently.
pub struct ConversationQueue {
    inner: Arc<Inner>,
}

struct Inner {
    states: Mutex<HashMap<ConversationId, QueueState>>,
    events: Arc<EventBus>,
}

impl ConversationQueue {
    pub fn new() -> Self {
        Self::with_events(Arc::new(EventBus::default()))
    }

    /// Construct with an event bus shared with the host.
    pub fn with_events(events: Arc<EventBus>) -> Self {
        Self {
            inner: Arc::new(Inner {
                states: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Schedule `work` for a conversation. Runs immediately when the
    /// conversation is idle, otherwise after all earlier entries for the
    /// same id, in enqueue order.
    pub fn enqueue<F>(&self, conversation: ConversationId, work: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let mut states = self.inner.states.lock().unwrap();
        let state = states.entry(conversation.clone()).or_default();

        if state.running {
            state.pending.push_back(work.boxed());
            let depth = state.pending.len();
            debug!(conversation = %conversation, depth, "Work queued behind running item");
            if depth > DEPTH_WARN_THRESHOLD {
                warn!(conversation = %conversation, depth, "Conversation queue depth unusually high");
            }
            return;
        }

        state.running = true;
        drop(states);

        let inner = self.inner.clone();
        tokio::spawn(inner.drive(conversation, work.boxed()));
    }

    /// Drop queued-but-not-started work for a conversation (conversation
    /// reset). Work already executing completes. Returns how many items
    /// were dropped.
    pub fn cancel_pending(&self, conversation: &ConversationId) -> usize {
        let mut states = self.inner.states.lock().unwrap();
        match states.get_mut(conversation) {
            Some(state) => {
                let dropped = state.pending.len();
                state.pending.clear();
                if !state.running {
                    states.remove(conversation);
                }
                if dropped > 0 {
                    debug!(conversation = %conversation, dropped, "Pending work cancelled");
                }
                dropped
            }
            None => 0,
        }
    }

    /// Number of queued-but-not-started items for this conversation.
    pub fn pending_len(&self, conversation: &ConversationId) -> usize {
        self.inner
            .states
            .lock()
            .unwrap()
            .get(conversation)
            .map(|s| s.pending.len())
            .unwrap_or(0)
    }

    /// Whether work is currently executing for this conversation.
    pub fn is_busy(&self, conversation: &ConversationId) -> bool {
        self.inner
            .states
            .lock()
            .unwrap()
            .get(conversation)
            .map(|s| s.running)
            .unwrap_or(false)
    }
}

impl Default for ConversationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Run `work` and then drain the conversation's pending list until it
    /// is empty. Exactly one driver exists per conversation at a time.
    ///
    /// Each item runs under `catch_unwind`: a panic inside work must not
    /// kill the driver before its bookkeeping, or `running` would stay set
    /// and the conversation's queue would never drain again.
    async fn drive(self: Arc<Inner>, conversation: ConversationId, mut work: Work) {
        loop {
            let failure = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => {
                    warn!(conversation = %conversation, error = %e, "Work item failed, advancing queue");
                    Some(e.to_string())
                }
                Err(panic) => {
                    let message = format!("work item panicked: {}", panic_message(&*panic));
                    error!(conversation = %conversation, "{message}");
                    Some(message)
                }
            };
            if let Some(message) = failure {
                self.events.publish(RuntimeEvent::WorkItemFailed {
                    conversation_id: conversation.0.clone(),
                    error_message: message,
                    timestamp: Utc::now(),
                });
            }

            let mut states = self.states.lock().unwrap();
            let Some(state) = states.get_mut(&conversation) else {
                return;
            };
            match state.pending.pop_front() {
                Some(next) => work = next,
                None => {
                    states.remove(&conversation);
                    return;
                }
            }
        }
    }
}

/// Best-effort extraction of a panic payload's message.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
