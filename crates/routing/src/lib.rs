//! Model routing for Colloquy.
//!
//! Two concerns live here:
//! - **Classification**: decide whether a query is `simple` or `complex`,
//!   cheaply and with a bounded worst case. A failing or slow classifier
//!   degrades to `simple` rather than blocking the pipeline.
//! - **Fallback calling**: invoke the chosen provider with a fixed retry
//!   policy — primary, one delayed same-provider retry, then one attempt on
//!   a distinct fallback provider — and surface every cause on exhaustion.

pub mod classify;
pub mod router;

pub use classify::{Classifier, Complexity, ComplexityProbe};
pub use router::{ModelRouter, RoutingDecision};
