//! RelevanceScorer trait — optional semantic scoring for history selection.
//!
//! When a host provides a scorer (embeddings, a reranker), the context
//! assembler uses it to rank older turns against the current query. When
//! absent, selection degrades to recency only.

use async_trait::async_trait;

use crate::turn::Turn;

/// Scores a stored turn's relevance to the current query.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Returns a score in `[0, 1]`; higher means more relevant.
    /// Implementations should be cheap — this runs once per candidate turn.
    async fn score(&self, query: &str, turn: &Turn) -> f32;
}
