//! History-window assembly — the context optimizer.
//!
//! Selects which stored turns accompany the current query so the payload
//! stays inside a token budget while maximizing relevance:
//!
//! 1. The most recent N turns are pinned unconditionally (short-term
//!    coherence), newest first when the budget forces a cut.
//! 2. Older turns are scored — semantic relevance when a scorer is
//!    available, recency otherwise, with a bonus for matching the active
//!    topic — and selected greedily until the budget is spent.
//! 3. The assembled sequence must open with a `user` turn (after any
//!    system turns); leading assistant/tool turns are skipped, and a
//!    synthetic placeholder is prepended when no user turn survives.
//!
//! Selection is lossy but idempotent: identical stored history and query
//! always produce the identical window. Stored turns are never mutated.

use colloquy_config::ContextConfig;
use colloquy_core::scorer::RelevanceScorer;
use colloquy_core::turn::{Role, Turn};
use serde::{Deserialize, Serialize};

use crate::context::token;

/// Placeholder content when no user turn survives selection. Providers
/// require conversations to open with a user turn.
const CONTINUATION_PLACEHOLDER: &str = "(continued conversation)";

/// Everything the assembler needs for one selection.
pub struct SelectionInput<'a> {
    /// Full stored history, arrival order, oldest first.
    pub turns: &'a [Turn],
    /// The current query (already appended to `turns` by the session).
    pub query: &'a str,
    /// Coarse tag for the conversation's active topic, if known.
    pub active_topic: Option<&'a str>,
}

/// The selected window plus instrumentation numbers.
#[derive(Debug, Clone)]
pub struct SelectedContext {
    /// Ordered turns to send, oldest first.
    pub turns: Vec<Turn>,
    /// Raw-vs-selected size numbers for observability.
    pub stats: ContextStats,
}

/// Raw vs. selected sizes for one assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextStats {
    pub raw_turns: usize,
    pub raw_tokens: usize,
    pub selected_turns: usize,
    pub selected_tokens: usize,
}

/// The history-window assembler. Stateless — create one and reuse it.
pub struct ContextAssembler {
    config: ContextConfig,
}

impl ContextAssembler {
    /// Create an assembler with the given budget configuration.
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Assemble the window for one model call.
    ///
    /// `scorer` is the optional relevance collaborator; absence degrades
    /// older-turn scoring to pure recency.
    ///
    /// The selection never exceeds the budget except in one degenerate
    /// case: at least one turn is always returned, so a budget smaller
    /// than any single turn yields exactly one over-budget turn.
    pub async fn assemble(
        &self,
        input: &SelectionInput<'_>,
        scorer: Option<&dyn RelevanceScorer>,
    ) -> SelectedContext {
        let budget = self.config.budget_tokens;
        let raw_tokens = token::estimate_turns_tokens(input.turns);

        // ── Pin the most recent N turns, newest kept first under pressure ──
        let pin_start = input.turns.len().saturating_sub(self.config.recent_turns);
        let mut used = 0usize;
        let mut selected: Vec<usize> = Vec::new();
        for idx in (pin_start..input.turns.len()).rev() {
            let cost = token::estimate_turn_tokens(&input.turns[idx]);
            // The newest turn carries the current query and is kept even
            // when it alone exceeds the budget.
            if used + cost > budget && !selected.is_empty() {
                break;
            }
            used += cost;
            selected.push(idx);
        }

        // ── Score and greedily add older turns ─────────────────────────────
        let mut candidates: Vec<(usize, f32)> = Vec::with_capacity(pin_start);
        for (idx, turn) in input.turns[..pin_start].iter().enumerate() {
            let base = match scorer {
                Some(s) => s.score(input.query, turn).await.clamp(0.0, 1.0),
                // Recency-only: newer turns score higher.
                None => (idx + 1) as f32 / (pin_start + 1) as f32,
            };
            // Topic affinity dominates: a same-topic turn always outranks
            // an off-topic one regardless of its base score.
            let score = 2.0 * topic_bonus(input.active_topic, turn.topic.as_deref()) + base;
            candidates.push((idx, score));
        }

        // Deterministic order: score descending, then newer first.
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.0.cmp(&a.0))
        });

        for (idx, _) in candidates {
            let cost = token::estimate_turn_tokens(&input.turns[idx]);
            if used + cost <= budget {
                used += cost;
                selected.push(idx);
            }
        }

        // Chronological order for the model.
        selected.sort_unstable();
        let mut turns: Vec<Turn> = selected
            .into_iter()
            .map(|idx| input.turns[idx].clone())
            .collect();

        // ── Post-condition: first non-system turn must be `user` ──────────
        loop {
            match turns.iter().position(|t| t.role != Role::System) {
                Some(pos) if turns[pos].role == Role::User => break,
                Some(pos) => {
                    turns.remove(pos);
                }
                None => break,
            }
        }
        if !turns.iter().any(|t| t.role == Role::User) {
            turns.insert(0, Turn::user(CONTINUATION_PLACEHOLDER));
        }

        // The placeholder can nudge the total past the budget; shed the
        // oldest non-user turn until the window fits again. One turn is
        // the floor: something must carry the current query, so a budget
        // smaller than a single turn yields that turn over budget.
        let mut selected_tokens = token::estimate_turns_tokens(&turns);
        while selected_tokens > budget && turns.len() > 1 {
            let drop_pos = turns
                .iter()
                .position(|t| t.role != Role::User)
                .unwrap_or(0);
            let dropped = turns.remove(drop_pos);
            selected_tokens -= token::estimate_turn_tokens(&dropped);
        }

        let stats = ContextStats {
            raw_turns: input.turns.len(),
            raw_tokens,
            selected_turns: turns.len(),
            selected_tokens,
        };

        tracing::debug!(
            raw_turns = stats.raw_turns,
            raw_tokens = stats.raw_tokens,
            selected_turns = stats.selected_turns,
            selected_tokens = stats.selected_tokens,
            "Assembled context window"
        );

        SelectedContext { turns, stats }
    }
}

/// Bonus for topic affinity: same tag scores highest, an adjacent tag
/// (same top-level segment, e.g. `infra/disk` vs `infra/network`) scores
/// half of that.
fn topic_bonus(active: Option<&str>, turn_topic: Option<&str>) -> f32 {
    let (Some(active), Some(topic)) = (active, turn_topic) else {
        return 0.0;
    };
    if active == topic {
        return 1.0;
    }
    fn root(t: &str) -> &str {
        t.split(['/', ':']).next().unwrap_or(t)
    }
    if root(active) == root(topic) {
        0.5
    } else {
        0.0
    }
}
