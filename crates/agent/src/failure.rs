//! Repeated-failure detection across tool rounds.
//!
//! When consecutive rounds surface the same class of failure the model is
//! almost certainly stuck in a retry loop. After two rounds in a row with
//! the same class, a hard-stop instruction is injected so the turn ends
//! with an explanation instead of burning the round budget.

use std::collections::HashMap;

/// Coarse classes of tool failure that warrant loop detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    PermissionDenied,
    ConnectionFailed,
    ApiFailure,
}

impl FailureClass {
    /// All classes, for reset bookkeeping.
    pub const ALL: [FailureClass; 3] = [
        FailureClass::PermissionDenied,
        FailureClass::ConnectionFailed,
        FailureClass::ApiFailure,
    ];

    /// Classify a tool result by its error signature, if it carries one.
    pub fn detect(output: &str) -> Option<FailureClass> {
        let lower = output.to_lowercase();
        const PERMISSION: [&str; 4] = [
            "permission denied",
            "access denied",
            "unauthorized",
            "forbidden",
        ];
        const CONNECTION: [&str; 4] = [
            "connection refused",
            "connection timed out",
            "network unreachable",
            "connection reset",
        ];
        const API: [&str; 5] = [
            "api request failed",
            "500 internal server error",
            "503 service unavailable",
            "rate limit",
            "too many requests",
        ];

        if PERMISSION.iter().any(|sig| lower.contains(sig)) {
            Some(FailureClass::PermissionDenied)
        } else if CONNECTION.iter().any(|sig| lower.contains(sig)) {
            Some(FailureClass::ConnectionFailed)
        } else if API.iter().any(|sig| lower.contains(sig)) {
            Some(FailureClass::ApiFailure)
        } else {
            None
        }
    }

    /// Instruction injected when this class repeats.
    pub fn hard_stop_message(&self) -> String {
        let label = match self {
            FailureClass::PermissionDenied => "a permissions problem",
            FailureClass::ConnectionFailed => "a connectivity problem",
            FailureClass::ApiFailure => "an upstream API problem",
        };
        format!(
            "Your last two tool attempts hit {label}. Do not retry the same \
             operation. Explain the blocker to the user and suggest what \
             they could do about it."
        )
    }
}

/// Tracks consecutive rounds exhibiting each failure class.
///
/// Counts are per-round, not per-call: a round with three permission
/// errors bumps `PermissionDenied` once. A class absent from a round
/// resets to zero, so only back-to-back repeats trigger the stop.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive: HashMap<FailureClass, u32>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the classes observed in one completed tool round. Returns
    /// the first class that has now repeated and should hard-stop the
    /// loop, if any.
    pub fn observe_round(&mut self, observed: &[FailureClass]) -> Option<FailureClass> {
        let mut tripped = None;
        for class in FailureClass::ALL {
            if observed.contains(&class) {
                let count = self.consecutive.entry(class).or_insert(0);
                *count += 1;
                if *count >= 2 && tripped.is_none() {
                    tripped = Some(class);
                }
            } else {
                self.consecutive.remove(&class);
            }
        }
        tripped
    }

    /// A round with no failures clears everything.
    pub fn reset(&mut self) {
        self.consecutive.clear();
    }
}
