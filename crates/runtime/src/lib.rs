//! Runtime assembly — the full inbound-to-outbound pipeline.
//!
//! Wires the pieces together: channel text enters through the batcher,
//! flushed batches queue one agent turn per conversation, and final
//! answers leave through the host's `ResponseSink`. Hosts supply the
//! collaborators this core deliberately does not own: model providers, a
//! tool gateway, transcript storage, and the outbound transport.

pub mod dispatcher;
pub mod store;

use std::sync::Arc;

use colloquy_agent::AgentSession;
use colloquy_config::AppConfig;
use colloquy_core::event::EventBus;
use colloquy_core::gateway::ToolGateway;
use colloquy_core::scorer::RelevanceScorer;
use colloquy_core::store::TranscriptStore;
use colloquy_core::turn::{ConversationId, SenderId};
use colloquy_ingress::{ConversationQueue, MessageBatcher};
use colloquy_routing::ModelRouter;
use tracing::info;

pub use dispatcher::{Dispatcher, ResponseSink};
pub use store::MemoryTranscriptStore;

/// Everything a host must supply to assemble a runtime.
pub struct RuntimeBuilder {
    config: AppConfig,
    router: ModelRouter,
    gateway: Arc<dyn ToolGateway>,
    store: Arc<dyn TranscriptStore>,
    responses: Arc<dyn ResponseSink>,
    scorer: Option<Arc<dyn RelevanceScorer>>,
    system_prompt: Option<String>,
}

impl RuntimeBuilder {
    pub fn new(
        config: AppConfig,
        router: ModelRouter,
        gateway: Arc<dyn ToolGateway>,
        store: Arc<dyn TranscriptStore>,
        responses: Arc<dyn ResponseSink>,
    ) -> Self {
        Self {
            config,
            router,
            gateway,
            store,
            responses,
            scorer: None,
            system_prompt: None,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn build(self) -> Runtime {
        let events = Arc::new(EventBus::default());
        let router = Arc::new(self.router);

        let mut session = AgentSession::new(
            router.clone(),
            self.gateway,
            self.store,
            self.config.agent.clone(),
            self.config.context.clone(),
        )
        .with_events(events.clone());
        if let Some(scorer) = self.scorer {
            session = session.with_scorer(scorer);
        }
        if let Some(prompt) = self.system_prompt {
            session = session.with_system_prompt(prompt);
        }

        let queue = Arc::new(ConversationQueue::with_events(events.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(session),
            queue.clone(),
            self.responses,
        ));
        let batcher =
            MessageBatcher::with_events(self.config.batching.clone(), dispatcher, events.clone());

        info!("Runtime assembled");
        Runtime {
            batcher,
            queue,
            router,
            events,
        }
    }
}

/// The assembled pipeline. Channel transports call `handle_message` and
/// `handle_typing`; answers arrive at the `ResponseSink` supplied at
/// build time.
pub struct Runtime {
    batcher: MessageBatcher,
    queue: Arc<ConversationQueue>,
    router: Arc<ModelRouter>,
    events: Arc<EventBus>,
}

impl Runtime {
    /// Inbound message from a channel transport.
    pub fn handle_message(
        &self,
        conversation: ConversationId,
        sender: SenderId,
        is_group: bool,
        text: impl Into<String>,
    ) {
        self.batcher.add_message(conversation, sender, is_group, text);
    }

    /// External "still composing" signal.
    pub fn handle_typing(&self, conversation: ConversationId, sender: SenderId, is_group: bool) {
        self.batcher.on_typing_signal(conversation, sender, is_group);
    }

    /// Conversation reset: drop pending batches, queued-but-unstarted
    /// work, and cached routing state. Work already executing completes;
    /// its output is still delivered and up to the host to discard.
    pub fn reset(&self, conversation: &ConversationId) {
        let batches = self.batcher.cancel(conversation);
        let work = self.queue.cancel_pending(conversation);
        self.router.forget(conversation);
        info!(
            conversation = %conversation,
            dropped_batches = batches,
            dropped_work = work,
            "Conversation reset"
        );
    }

    /// The runtime's event bus, for metrics or dashboards.
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// verbosity flag.
pub fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}
