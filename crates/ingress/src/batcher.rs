//! Message batching — combining rapid-fire inbound messages into one turn.
//!
//! People type in bursts. Triggering a model turn per message wastes calls
//! and produces fragmented answers, so inbound payloads are buffered per
//! batching key and flushed as one combined batch after a quiet period.
//! Direct conversations use a short debounce window; group conversations a
//! longer one. Each scope also has a hard ceiling beyond which the batch
//! flushes regardless of continued activity, to bound latency.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use colloquy_config::BatchingConfig;
use colloquy_core::event::{EventBus, RuntimeEvent};
use colloquy_core::turn::{ConversationId, SenderId};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// The map key a pending batch lives under. Group conversations can batch
/// per sender so interleaved speakers don't get merged into one turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BatchKey {
    conversation: ConversationId,
    sender: Option<SenderId>,
}

/// One flushed batch, handed to the sink exactly once.
#[derive(Debug, Clone)]
pub struct FlushedBatch {
    pub conversation: ConversationId,
    pub sender: Option<SenderId>,
    pub is_group: bool,
    /// Raw payloads in arrival order.
    pub items: Vec<String>,
}

/// Receives flushed batches. Typically the dispatcher that enqueues a
/// conversation turn.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn on_batch_ready(&self, batch: FlushedBatch);
}

struct PendingBatch {
    items: Vec<String>,
    is_group: bool,
    first_arrival: Instant,
    /// Bumped on every timer reset; a timer only flushes if its
    /// generation is still current, so a reset or concurrent flush
    /// invalidates stale timers even if abort loses the race.
    generation: u64,
    timer: JoinHandle<()>,
}

/// Buffers inbound messages per (conversation, sender) and flushes a
/// combined batch after the debounce window or the hard ceiling.
pub struct MessageBatcher {
    inner: Arc<Inner>,
}

struct Inner {
    config: BatchingConfig,
    sink: Arc<dyn BatchSink>,
    events: Arc<EventBus>,
    pending: Mutex<HashMap<BatchKey, PendingBatch>>,
}

impl MessageBatcher {
    pub fn new(config: BatchingConfig, sink: Arc<dyn BatchSink>) -> Self {
        Self::with_events(config, sink, Arc::new(EventBus::default()))
    }

    /// Construct with an event bus shared with the host.
    pub fn with_events(
        config: BatchingConfig,
        sink: Arc<dyn BatchSink>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sink,
                events,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Append a payload to the pending batch for this key, starting one if
    /// none exists, and reset the debounce timer.
    pub fn add_message(
        &self,
        conversation: ConversationId,
        sender: SenderId,
        is_group: bool,
        payload: impl Into<String>,
    ) {
        let key = self.inner.key_for(conversation, sender, is_group);
        let payload = payload.into();

        let mut pending = self.inner.pending.lock().unwrap();
        match pending.get_mut(&key) {
            Some(batch) => {
                batch.items.push(payload);
                trace!(
                    conversation = %key.conversation,
                    items = batch.items.len(),
                    "Message appended to pending batch"
                );
                Inner::reset_timer(&self.inner, &key, batch);
            }
            None => {
                let mut batch = PendingBatch {
                    items: vec![payload],
                    is_group,
                    first_arrival: Instant::now(),
                    generation: 0,
                    timer: tokio::spawn(async {}),
                };
                debug!(conversation = %key.conversation, "New pending batch");
                Inner::reset_timer(&self.inner, &key, &mut batch);
                pending.insert(key, batch);
            }
        }
    }

    /// Treat an external "still composing" signal as activity: reset the
    /// debounce timer for an existing batch without adding a message. A
    /// signal with no pending batch is a no-op.
    pub fn on_typing_signal(&self, conversation: ConversationId, sender: SenderId, is_group: bool) {
        let key = self.inner.key_for(conversation, sender, is_group);
        let mut pending = self.inner.pending.lock().unwrap();
        if let Some(batch) = pending.get_mut(&key) {
            trace!(conversation = %key.conversation, "Typing signal, extending debounce");
            Inner::reset_timer(&self.inner, &key, batch);
        }
    }

    /// Drop every pending batch for a conversation (conversation reset).
    /// Returns how many batches were discarded.
    pub fn cancel(&self, conversation: &ConversationId) -> usize {
        let mut pending = self.inner.pending.lock().unwrap();
        let keys: Vec<BatchKey> = pending
            .keys()
            .filter(|k| &k.conversation == conversation)
            .cloned()
            .collect();
        for key in &keys {
            if let Some(batch) = pending.remove(key) {
                batch.timer.abort();
            }
        }
        if !keys.is_empty() {
            debug!(conversation = %conversation, dropped = keys.len(), "Pending batches cancelled");
        }
        keys.len()
    }

    /// Number of keys with a pending batch. Test and introspection hook.
    pub fn pending_keys(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }
}

impl Inner {
    fn key_for(&self, conversation: ConversationId, sender: SenderId, is_group: bool) -> BatchKey {
        let sender = (is_group && self.config.per_sender_in_groups).then_some(sender);
        BatchKey {
            conversation,
            sender,
        }
    }

    fn windows(&self, is_group: bool) -> (Duration, Duration) {
        if is_group {
            (
                Duration::from_secs(self.config.group_window_secs),
                Duration::from_secs(self.config.group_max_wait_secs),
            )
        } else {
            (
                Duration::from_secs(self.config.direct_window_secs),
                Duration::from_secs(self.config.direct_max_wait_secs),
            )
        }
    }

    /// Replace the key's timer with a fresh one. The sleep is the debounce
    /// window, clipped to whatever remains of the hard ceiling measured
    /// from the batch's first arrival.
    fn reset_timer(inner: &Arc<Inner>, key: &BatchKey, batch: &mut PendingBatch) {
        batch.timer.abort();
        batch.generation += 1;

        let (window, ceiling) = inner.windows(batch.is_group);
        let remaining = ceiling.saturating_sub(batch.first_arrival.elapsed());
        let sleep = window.min(remaining);

        let inner = inner.clone();
        let key = key.clone();
        let generation = batch.generation;
        batch.timer = tokio::spawn(async move {
            tokio::time::sleep(sleep).await;
            inner.flush_if_current(key, generation).await;
        });
    }

    /// Flush the key's batch if the firing timer is still the current one.
    /// The batch is removed from the map before the sink runs, so a
    /// message arriving mid-flush starts a fresh batch instead of being
    /// appended to (or lost with) the one in flight.
    async fn flush_if_current(self: Arc<Inner>, key: BatchKey, generation: u64) {
        let batch = {
            let mut pending = self.pending.lock().unwrap();
            match pending.get(&key) {
                Some(batch) if batch.generation == generation => pending.remove(&key),
                _ => None,
            }
        };
        let Some(batch) = batch else {
            return;
        };

        debug!(
            conversation = %key.conversation,
            items = batch.items.len(),
            "Flushing batch"
        );
        self.events.publish(RuntimeEvent::BatchFlushed {
            conversation_id: key.conversation.0.clone(),
            items: batch.items.len(),
            timestamp: Utc::now(),
        });

        self.sink
            .on_batch_ready(FlushedBatch {
                conversation: key.conversation.clone(),
                sender: key.sender.clone(),
                is_group: batch.is_group,
                items: batch.items,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        flushes: Mutex<Vec<FlushedBatch>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                flushes: Mutex::new(Vec::new()),
            })
        }

        fn flushes(&self) -> Vec<FlushedBatch> {
            self.flushes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn on_batch_ready(&self, batch: FlushedBatch) {
            self.flushes.lock().unwrap().push(batch);
        }
    }

    fn config() -> BatchingConfig {
        BatchingConfig {
            direct_window_secs: 5,
            group_window_secs: 30,
            direct_max_wait_secs: 30,
            group_max_wait_secs: 120,
            per_sender_in_groups: true,
        }
    }

    fn conv(s: &str) -> ConversationId {
        ConversationId::from(s)
    }

    fn sender(s: &str) -> SenderId {
        SenderId::from(s)
    }

    async fn settle() {
        // Let spawned timer tasks run to completion under paused time.
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_period_yields_single_combined_flush() {
        let sink = RecordingSink::new();
        let batcher = MessageBatcher::new(config(), sink.clone());

        batcher.add_message(conv("c1"), sender("u1"), false, "check server load");
        tokio::time::sleep(Duration::from_secs(1)).await;
        batcher.add_message(conv("c1"), sender("u1"), false, "and check disk space");

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;

        let flushes = sink.flushes();
        assert_eq!(flushes.len(), 1);
        assert_eq!(
            flushes[0].items,
            vec!["check server load", "and check disk space"]
        );
        assert_eq!(batcher.pending_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn each_message_resets_the_window() {
        let sink = RecordingSink::new();
        let batcher = MessageBatcher::new(config(), sink.clone());

        // Messages every 4s stay inside the 5s window: no flush yet.
        for i in 0..3 {
            batcher.add_message(conv("c1"), sender("u1"), false, format!("part {i}"));
            tokio::time::sleep(Duration::from_secs(4)).await;
        }
        assert!(sink.flushes().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(sink.flushes().len(), 1);
        assert_eq!(sink.flushes()[0].items.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hard_ceiling_flushes_despite_activity() {
        let sink = RecordingSink::new();
        let batcher = MessageBatcher::new(config(), sink.clone());

        // A message every 4s forever would reset the window indefinitely;
        // the 30s ceiling must still force a flush.
        for i in 0..10 {
            batcher.add_message(conv("c1"), sender("u1"), false, format!("m{i}"));
            tokio::time::sleep(Duration::from_secs(4)).await;
        }
        settle().await;

        let flushes = sink.flushes();
        assert!(!flushes.is_empty(), "ceiling should have forced a flush");
        // Messages 0..=7 arrive before the 30s ceiling fires.
        assert_eq!(flushes[0].items.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_signal_extends_without_adding() {
        let sink = RecordingSink::new();
        let batcher = MessageBatcher::new(config(), sink.clone());

        batcher.add_message(conv("c1"), sender("u1"), false, "hold on");
        tokio::time::sleep(Duration::from_secs(4)).await;
        batcher.on_typing_signal(conv("c1"), sender("u1"), false);

        // 4s after the signal: the original window would have fired by now.
        tokio::time::sleep(Duration::from_secs(4)).await;
        settle().await;
        assert!(sink.flushes().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(sink.flushes().len(), 1);
        assert_eq!(sink.flushes()[0].items, vec!["hold on"]);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_signal_without_batch_is_noop() {
        let sink = RecordingSink::new();
        let batcher = MessageBatcher::new(config(), sink.clone());

        batcher.on_typing_signal(conv("c1"), sender("u1"), false);
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;

        assert!(sink.flushes().is_empty());
        assert_eq!(batcher.pending_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_batch_independently() {
        let sink = RecordingSink::new();
        let batcher = MessageBatcher::new(config(), sink.clone());

        batcher.add_message(conv("c1"), sender("u1"), false, "for c1");
        tokio::time::sleep(Duration::from_secs(3)).await;
        batcher.add_message(conv("c2"), sender("u2"), false, "for c2");

        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        // c1 went quiet 6s ago, c2 only 3s ago.
        let flushes = sink.flushes();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].conversation, conv("c1"));

        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(sink.flushes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn group_senders_batch_separately() {
        let sink = RecordingSink::new();
        let batcher = MessageBatcher::new(config(), sink.clone());

        batcher.add_message(conv("g1"), sender("alice"), true, "from alice");
        batcher.add_message(conv("g1"), sender("bob"), true, "from bob");
        assert_eq!(batcher.pending_keys(), 2);

        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;

        let flushes = sink.flushes();
        assert_eq!(flushes.len(), 2);
        assert!(flushes.iter().all(|f| f.items.len() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn group_uses_long_window() {
        let sink = RecordingSink::new();
        let batcher = MessageBatcher::new(config(), sink.clone());

        batcher.add_message(conv("g1"), sender("alice"), true, "group message");
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert!(sink.flushes().is_empty(), "group window is 30s, not 5s");

        tokio::time::sleep(Duration::from_secs(21)).await;
        settle().await;
        assert_eq!(sink.flushes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn message_after_flush_starts_fresh_batch() {
        let sink = RecordingSink::new();
        let batcher = MessageBatcher::new(config(), sink.clone());

        batcher.add_message(conv("c1"), sender("u1"), false, "first");
        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(sink.flushes().len(), 1);

        batcher.add_message(conv("c1"), sender("u1"), false, "second");
        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;

        let flushes = sink.flushes();
        assert_eq!(flushes.len(), 2);
        assert_eq!(flushes[1].items, vec!["second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_batches() {
        let sink = RecordingSink::new();
        let batcher = MessageBatcher::new(config(), sink.clone());

        batcher.add_message(conv("c1"), sender("u1"), false, "doomed");
        assert_eq!(batcher.cancel(&conv("c1")), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert!(sink.flushes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sink_does_not_lose_concurrent_messages() {
        struct SlowSink {
            flushes: Mutex<Vec<FlushedBatch>>,
        }

        #[async_trait]
        impl BatchSink for SlowSink {
            async fn on_batch_ready(&self, batch: FlushedBatch) {
                tokio::time::sleep(Duration::from_secs(2)).await;
                self.flushes.lock().unwrap().push(batch);
            }
        }

        let sink = Arc::new(SlowSink {
            flushes: Mutex::new(Vec::new()),
        });
        let batcher = MessageBatcher::new(config(), sink.clone());

        batcher.add_message(conv("c1"), sender("u1"), false, "first");
        // Flush fires at 5s; while the sink is busy (5s..7s) another
        // message arrives. It must start a fresh batch.
        tokio::time::sleep(Duration::from_secs(6)).await;
        batcher.add_message(conv("c1"), sender("u1"), false, "second");

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;

        let flushes = sink.flushes.lock().unwrap();
        assert_eq!(flushes.len(), 2);
        assert_eq!(flushes[0].items, vec!["first"]);
        assert_eq!(flushes[1].items, vec!["second"]);
    }
}
