//! The per-turn agent session: the tool-calling loop.
//!
//! One session handles one conversation turn end to end: persist the user
//! turn, classify and route, then alternate model calls and tool rounds
//! until the model answers in plain text or a guard rail fires. Guard
//! rails (round budget, repeated-failure hard stop, promise nudges, the
//! whole-turn timeout) all degrade to user-facing text, never to errors —
//! only collaborator faults like an unknown provider propagate as `Err`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use colloquy_config::{AgentConfig, ContextConfig};
use colloquy_core::error::{Error, Result, RoutingError};
use colloquy_core::event::{EventBus, RuntimeEvent};
use colloquy_core::gateway::ToolGateway;
use colloquy_core::provider::ChatRequest;
use colloquy_core::scorer::RelevanceScorer;
use colloquy_core::store::TranscriptStore;
use colloquy_core::turn::{ConversationId, Role, Turn};
use colloquy_routing::ModelRouter;
use tracing::{debug, info, warn};

use crate::context::{ContextAssembler, SelectionInput};
use crate::failure::{FailureClass, FailureTracker};
use crate::mask::mask_secrets;
use crate::promise::{looks_like_unfulfilled_promise, PROMISE_NUDGE};
use crate::repair::normalize_tool_input;

/// How many trailing turns the classifier sees as recent context.
const CLASSIFIER_CONTEXT_TURNS: usize = 4;

/// How far back to look for tool activity when deciding whether a task
/// is already in flight.
const ACTIVE_TASK_LOOKBACK: usize = 10;

const EXHAUSTED_ROUTING_MESSAGE: &str = "I'm having trouble reaching the \
    language model right now. Please try again in a moment.";

const TIMEOUT_MESSAGE: &str = "That took longer than I'm allowed to spend on \
    one request, so I had to stop. Anything finished so far has been kept; \
    ask me to continue if you'd like.";

const ROUND_LIMIT_FALLBACK: &str = "I ran out of steps before finishing. The \
    work done so far has been recorded; ask me to continue if you'd like.";

const EMPTY_RESPONSE_FALLBACK: &str =
    "I wasn't able to produce a response. Please try again.";

const ROUND_LIMIT_SUMMARY_PROMPT: &str = "You have reached the action limit \
    for this turn. Without calling any more tools, summarize what you \
    accomplished and what remains to be done.";

/// One inbound request for the session to process.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub conversation: ConversationId,
    /// The (possibly batch-combined) user text.
    pub text: String,
    /// Pre-extracted description of an attached image, if any. Folded
    /// into the user turn so it survives transcript persistence.
    pub image_context: Option<String>,
}

impl TurnInput {
    pub fn new(conversation: ConversationId, text: impl Into<String>) -> Self {
        Self {
            conversation,
            text: text.into(),
            image_context: None,
        }
    }

    pub fn with_image_context(mut self, context: impl Into<String>) -> Self {
        self.image_context = Some(context.into());
        self
    }
}

/// Runs conversation turns against a router, gateway, and store.
pub struct AgentSession {
    router: Arc<ModelRouter>,
    gateway: Arc<dyn ToolGateway>,
    store: Arc<dyn TranscriptStore>,
    assembler: ContextAssembler,
    scorer: Option<Arc<dyn RelevanceScorer>>,
    events: Arc<EventBus>,
    system_prompt: Option<String>,
    config: AgentConfig,
}

impl AgentSession {
    pub fn new(
        router: Arc<ModelRouter>,
        gateway: Arc<dyn ToolGateway>,
        store: Arc<dyn TranscriptStore>,
        agent: AgentConfig,
        context: ContextConfig,
    ) -> Self {
        Self {
            router,
            gateway,
            store,
            assembler: ContextAssembler::new(context),
            scorer: None,
            events: Arc::new(EventBus::default()),
            system_prompt: None,
            config: agent,
        }
    }

    /// Attach a relevance scorer for context selection.
    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Share an event bus with the host.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Set the identity prompt prepended to every model call.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Process one turn. The whole turn runs under the configured timeout;
    /// on expiry the partial history is kept and a degraded message is
    /// returned in place of an answer.
    pub async fn run(&self, input: TurnInput) -> Result<String> {
        let conversation = input.conversation.clone();
        let timeout = Duration::from_secs(self.config.turn_timeout_secs);

        match tokio::time::timeout(timeout, self.run_inner(input)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    conversation = %conversation,
                    timeout_secs = self.config.turn_timeout_secs,
                    "Turn timed out, abandoning"
                );
                self.events.publish(RuntimeEvent::TurnTimedOut {
                    conversation_id: conversation.0,
                    timeout_secs: self.config.turn_timeout_secs,
                    timestamp: Utc::now(),
                });
                Ok(TIMEOUT_MESSAGE.to_string())
            }
        }
    }

    async fn run_inner(&self, input: TurnInput) -> Result<String> {
        let conversation = &input.conversation;
        let mut history = self.store.load(conversation).await.map_err(Error::Store)?;

        let query = match &input.image_context {
            Some(image) => format!("[Attached image: {image}]\n\n{}", input.text),
            None => input.text.clone(),
        };

        let has_active_task = recent_tool_activity(&history);
        let recent_context = trailing_context(&history);

        let user_turn = Turn::user(query.clone());
        self.append(conversation, &mut history, user_turn).await?;

        // Routing is decided once per turn; every round uses the same model.
        let complexity = self
            .router
            .classify(conversation, &query, &recent_context, has_active_task)
            .await;
        let decision = self.router.resolve(complexity);
        info!(
            conversation = %conversation,
            complexity = ?complexity,
            model = %decision.model,
            "Turn routed"
        );

        let active_topic = history.iter().rev().find_map(|t| t.topic.clone());
        let tools = self.gateway.specs();

        let mut failures = FailureTracker::new();
        let mut promise_retries: u32 = 0;

        for round in 0..self.config.max_rounds {
            let request = self
                .build_request(&history, &query, active_topic.as_deref(), &decision)
                .await;

            let response = match self.router.call_with_fallback(request, &decision).await {
                Ok(response) => response,
                Err(RoutingError::Exhausted { attempts }) => {
                    warn!(
                        conversation = %conversation,
                        attempts = attempts.len(),
                        "All providers exhausted, degrading"
                    );
                    return Ok(EXHAUSTED_ROUTING_MESSAGE.to_string());
                }
                Err(e) => return Err(Error::Routing(e)),
            };

            let assistant = response.turn.clone();

            if assistant.tool_calls.is_empty() {
                // A plain-text reply that announces an action it never took
                // gets a corrective nudge, within a small budget.
                if looks_like_unfulfilled_promise(&assistant.content)
                    && promise_retries < self.config.promise_retry_budget
                    && !tools.is_empty()
                {
                    promise_retries += 1;
                    debug!(
                        conversation = %conversation,
                        attempt = promise_retries,
                        "Unfulfilled promise detected, nudging"
                    );
                    self.append(conversation, &mut history, assistant).await?;
                    self.append(conversation, &mut history, Turn::system(PROMISE_NUDGE))
                        .await?;
                    continue;
                }

                let text = if assistant.content.trim().is_empty() {
                    EMPTY_RESPONSE_FALLBACK.to_string()
                } else {
                    assistant.content.clone()
                };
                self.append(conversation, &mut history, assistant).await?;
                self.events.publish(RuntimeEvent::ResponseGenerated {
                    conversation_id: conversation.0.clone(),
                    model: response.model,
                    tokens_used: response.usage.map(|u| u.total_tokens).unwrap_or(0),
                    timestamp: Utc::now(),
                });
                debug!(conversation = %conversation, rounds = round + 1, "Turn complete");
                return Ok(text);
            }

            // ── Tool round ─────────────────────────────────────────────────
            let calls = assistant.tool_calls.clone();
            let call_count = calls.len();
            self.append(conversation, &mut history, assistant).await?;

            let mut observed: Vec<FailureClass> = Vec::new();
            for call in calls {
                let normalized = normalize_tool_input(call.input);
                let started = std::time::Instant::now();
                let raw_output = self.gateway.execute(&call.name, normalized).await;
                let output = mask_secrets(&raw_output);

                let class = FailureClass::detect(&output);
                if let Some(class) = class {
                    observed.push(class);
                }
                self.events.publish(RuntimeEvent::ToolExecuted {
                    tool_name: call.name.clone(),
                    success: class.is_none(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    timestamp: Utc::now(),
                });

                self.append(conversation, &mut history, Turn::tool_result(call.id, output))
                    .await?;
            }

            // Any successful invocation restores the promise budget; the
            // failure tally resets only when the whole round is clean.
            if observed.len() < call_count {
                promise_retries = 0;
            }
            if observed.is_empty() {
                failures.reset();
            } else if let Some(class) = failures.observe_round(&observed) {
                warn!(
                    conversation = %conversation,
                    class = ?class,
                    "Same failure class two rounds running, injecting hard stop"
                );
                self.append(
                    conversation,
                    &mut history,
                    Turn::system(class.hard_stop_message()),
                )
                .await?;
            }
        }

        // Round budget spent. One final call, with no tools offered, asks
        // the model to report where things stand.
        warn!(
            conversation = %conversation,
            max_rounds = self.config.max_rounds,
            "Round budget exhausted, requesting summary"
        );
        self.append(
            conversation,
            &mut history,
            Turn::system(ROUND_LIMIT_SUMMARY_PROMPT),
        )
        .await?;

        let mut request = self
            .build_request(&history, &query, active_topic.as_deref(), &decision)
            .await;
        request.tools = Vec::new();

        match self.router.call_with_fallback(request, &decision).await {
            Ok(response) if !response.turn.content.trim().is_empty() => {
                let text = response.turn.content.clone();
                self.append(conversation, &mut history, response.turn).await?;
                Ok(text)
            }
            _ => Ok(ROUND_LIMIT_FALLBACK.to_string()),
        }
    }

    async fn build_request(
        &self,
        history: &[Turn],
        query: &str,
        active_topic: Option<&str>,
        decision: &colloquy_routing::RoutingDecision,
    ) -> ChatRequest {
        let selection = SelectionInput {
            turns: history,
            query,
            active_topic,
        };
        let selected = self
            .assembler
            .assemble(&selection, self.scorer.as_deref())
            .await;

        let mut turns = Vec::with_capacity(selected.turns.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            turns.push(Turn::system(prompt.clone()));
        }
        turns.extend(selected.turns);

        ChatRequest {
            model: decision.model.clone(),
            turns,
            temperature: self.config.temperature,
            max_output_tokens: Some(decision.max_output_tokens),
            tools: self.gateway.specs(),
        }
    }

    async fn append(
        &self,
        conversation: &ConversationId,
        history: &mut Vec<Turn>,
        turn: Turn,
    ) -> Result<()> {
        self.store
            .append(conversation, turn.clone())
            .await
            .map_err(Error::Store)?;
        history.push(turn);
        Ok(())
    }
}

/// Whether the trailing history shows a task already in flight (tool
/// results or assistant turns that requested tools).
fn recent_tool_activity(history: &[Turn]) -> bool {
    history
        .iter()
        .rev()
        .take(ACTIVE_TASK_LOOKBACK)
        .any(|t| t.role == Role::Tool || !t.tool_calls.is_empty())
}

fn trailing_context(history: &[Turn]) -> String {
    let start = history.len().saturating_sub(CLASSIFIER_CONTEXT_TURNS);
    history[start..]
        .iter()
        .map(|t| t.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
