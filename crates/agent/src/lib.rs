//! The agent loop — the heart of Colloquy.
//!
//! A conversation turn follows a **route → assemble → act** cycle:
//!
//! 1. **Persist** the (batch-combined) user text as a turn
//! 2. **Route** the query to a model tier via complexity classification
//! 3. **Assemble** a budgeted history window around the query
//! 4. **If tool calls**: execute them, append the results, loop back to 3
//! 5. **If text**: persist the answer and return it
//!
//! The loop runs until the model answers in plain text or a guard rail
//! fires: the per-turn round budget, the repeated-failure hard stop, the
//! unfulfilled-promise nudge budget, or the whole-turn timeout. Every
//! guard rail degrades to user-facing text rather than an error.

pub mod context;
pub mod failure;
pub mod mask;
pub mod promise;
pub mod repair;
pub mod session;

pub use context::{ContextAssembler, ContextStats, SelectedContext, SelectionInput};
pub use failure::{FailureClass, FailureTracker};
pub use session::{AgentSession, TurnInput};
