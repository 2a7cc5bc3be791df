//! History-window assembly.
//!
//! Selects a token-budgeted, relevance-ranked window of stored turns for
//! each model call. The most recent turns are always kept; older history
//! competes on topic affinity and relevance (or recency when no scorer is
//! configured). Output always opens with a `user` turn.

pub mod assembler;
pub mod token;

pub use assembler::{ContextAssembler, ContextStats, SelectedContext, SelectionInput};
