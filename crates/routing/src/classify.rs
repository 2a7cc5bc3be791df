//! Query complexity classification.
//!
//! Simple queries (greetings, short questions, acknowledgements) go to a
//! cheap model; technical or long queries go to the primary model. A short
//! "continue the previous task" message reuses the conversation's cached
//! complexity instead of reclassifying, for a bounded cache lifetime.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use colloquy_config::RoutingConfig;
use colloquy_core::error::ProviderError;
use colloquy_core::turn::ConversationId;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Classification of a query's complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    /// Short, simple queries → cheap model
    Simple,
    /// Technical or long queries → primary model
    Complex,
}

/// An optional auxiliary classifier (typically a fast model).
///
/// When present it is consulted under a bounded timeout; a probe failure
/// or timeout defaults the query to `Simple` rather than blocking.
#[async_trait]
pub trait ComplexityProbe: Send + Sync {
    async fn classify(
        &self,
        query: &str,
        recent_context: &str,
    ) -> std::result::Result<Complexity, ProviderError>;
}

/// Queries at or above this length are always `Complex`.
const COMPLEX_MIN_CHARS: usize = 1000;

/// Queries short enough to be continuation candidates.
const CONTINUATION_MAX_CHARS: usize = 40;

/// Phrases that signal "continue the previous task" rather than a new query.
const CONTINUATION_PHRASES: &[&str] = &[
    "continue",
    "go on",
    "keep going",
    "carry on",
    "proceed",
    "next",
    "do it",
    "yes, do that",
    "yes do that",
    "and then?",
    "finish it",
];

/// Keywords that mark a query as technical regardless of length.
const COMPLEX_KEYWORDS: &[&str] = &[
    "code", "script", "compile", "build", "deploy", "server", "database",
    "error", "exception", "stack trace", "debug", "analyze", "implement",
    "refactor", "regex", "disk", "memory", "logs", "install", "configure",
    "benchmark", "migrate",
];

struct CachedComplexity {
    complexity: Complexity,
    cached_at: Instant,
}

/// Classifies queries, caching the result per conversation.
pub struct Classifier {
    probe: Option<Box<dyn ComplexityProbe>>,
    probe_timeout: Duration,
    cache_ttl: Duration,
    cache: Mutex<HashMap<ConversationId, CachedComplexity>>,
}

impl Classifier {
    /// Create a classifier from routing configuration.
    pub fn new(config: &RoutingConfig) -> Self {
        Self {
            probe: None,
            probe_timeout: Duration::from_secs(config.classifier_timeout_secs),
            cache_ttl: Duration::from_secs(config.complexity_cache_ttl_secs),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Attach an auxiliary probe.
    pub fn with_probe(mut self, probe: Box<dyn ComplexityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Classify a query.
    ///
    /// `recent_context` is a short rendering of the last few turns; it feeds
    /// the probe and gates continuation reuse (`has_active_task` says the
    /// conversation recently did multi-step or technical work).
    pub async fn classify(
        &self,
        conversation: &ConversationId,
        query: &str,
        recent_context: &str,
        has_active_task: bool,
    ) -> Complexity {
        // Continuation reuse: a short "keep going" message inherits the
        // conversation's cached complexity while the cache entry is fresh.
        if has_active_task && is_continuation(query) {
            if let Some(cached) = self.cached(conversation) {
                debug!(
                    conversation_id = %conversation,
                    complexity = ?cached,
                    "Continuation phrase, reusing cached complexity"
                );
                return cached;
            }
        }

        let complexity = match &self.probe {
            Some(probe) => {
                match tokio::time::timeout(
                    self.probe_timeout,
                    probe.classify(query, recent_context),
                )
                .await
                {
                    Ok(Ok(complexity)) => complexity,
                    Ok(Err(e)) => {
                        warn!(error = %e, "Complexity probe failed, defaulting to simple");
                        Complexity::Simple
                    }
                    Err(_) => {
                        warn!(
                            timeout_secs = self.probe_timeout.as_secs(),
                            "Complexity probe timed out, defaulting to simple"
                        );
                        Complexity::Simple
                    }
                }
            }
            None => heuristic(query),
        };

        self.remember(conversation, complexity);
        complexity
    }

    /// Drop the cached complexity for a conversation (conversation reset).
    pub fn forget(&self, conversation: &ConversationId) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(conversation);
        }
    }

    fn cached(&self, conversation: &ConversationId) -> Option<Complexity> {
        let cache = self.cache.lock().ok()?;
        let entry = cache.get(conversation)?;
        if entry.cached_at.elapsed() <= self.cache_ttl {
            Some(entry.complexity)
        } else {
            None
        }
    }

    fn remember(&self, conversation: &ConversationId, complexity: Complexity) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                conversation.clone(),
                CachedComplexity {
                    complexity,
                    cached_at: Instant::now(),
                },
            );
        }
    }
}

/// Keyword/length heuristic used when no probe is configured.
fn heuristic(query: &str) -> Complexity {
    if query.len() >= COMPLEX_MIN_CHARS {
        return Complexity::Complex;
    }

    let lowered = query.to_lowercase();
    if COMPLEX_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        return Complexity::Complex;
    }

    Complexity::Simple
}

/// Whether a query is a short continuation phrase.
fn is_continuation(query: &str) -> bool {
    let trimmed = query.trim();
    if trimmed.len() > CONTINUATION_MAX_CHARS {
        return false;
    }
    let lowered = trimmed.trim_end_matches(['.', '!']).to_lowercase();
    CONTINUATION_PHRASES
        .iter()
        .any(|phrase| lowered == *phrase || lowered.starts_with(&format!("{phrase} ")))
}
