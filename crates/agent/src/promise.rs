//! Detection of "I'll do that now" responses that execute nothing.
//!
//! Models sometimes announce an action in prose instead of emitting a
//! tool call. A turn that ends that way reads as a lie to the user, so
//! the session nudges the model to actually act, up to a small budget.

use once_cell::sync::Lazy;
use regex::Regex;

/// Corrective instruction injected when a promise goes unfulfilled.
pub const PROMISE_NUDGE: &str = "You said you would perform an action but did \
    not call any tool. Either execute the action now using the available \
    tools, or tell the user plainly that you cannot.";

static PROMISE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(i'?ll|i will|i am going to|i'?m going to)\s+(now\s+)?(check|run|execute|look|search|fetch|get|read|write|create|update|delete|list|install|try|start|verify|inspect)",
        r"(?i)\blet me\s+(now\s+)?(check|run|execute|look|search|fetch|get|read|try|verify|inspect)",
        r"(?i)\b(checking|running|executing|fetching|searching|looking into|verifying)\b.*\b(now|right away|for you)\b",
        r"(?i)\bone (moment|second|sec)\b",
        r"(?i)\bgive me a (moment|second|minute)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static promise pattern compiles"))
    .collect()
});

static DISCLAIMER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bi (cannot|can'?t|am unable to|won'?t be able to)\b",
        r"(?i)\bi don'?t have (access|the ability|a tool)\b",
        r"(?i)\bno tool (is )?available\b",
        r"(?i)\bif you (want|'?d like)\b",
        r"(?i)\bwould you like me to\b",
        r"(?i)\bhere('?s| is) (what|how|the)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static disclaimer pattern compiles"))
    .collect()
});

/// Whether an assistant response without tool calls reads like a deferred
/// action. Disclaimers and offers ("would you like me to...") are not
/// promises, and neither is a substantive answer that merely mentions
/// future work in passing.
pub fn looks_like_unfulfilled_promise(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }

    if DISCLAIMER_PATTERNS.iter().any(|p| p.is_match(trimmed)) {
        return false;
    }

    if !PROMISE_PATTERNS.iter().any(|p| p.is_match(trimmed)) {
        return false;
    }

    // A long response that happens to mention future work is already a
    // real answer; only short announcement-style replies are stalls.
    trimmed.len() < 400
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ill_check_is_a_promise() {
        assert!(looks_like_unfulfilled_promise(
            "I'll check the disk usage now."
        ));
    }

    #[test]
    fn let_me_run_is_a_promise() {
        assert!(looks_like_unfulfilled_promise(
            "Let me run that command for you."
        ));
    }

    #[test]
    fn one_moment_is_a_promise() {
        assert!(looks_like_unfulfilled_promise(
            "One moment while I look that up."
        ));
    }

    #[test]
    fn plain_answer_is_not_a_promise() {
        assert!(!looks_like_unfulfilled_promise(
            "The capital of France is Paris."
        ));
    }

    #[test]
    fn inability_disclaimer_is_not_a_promise() {
        assert!(!looks_like_unfulfilled_promise(
            "I can't check that because I don't have access to your server."
        ));
    }

    #[test]
    fn offer_is_not_a_promise() {
        assert!(!looks_like_unfulfilled_promise(
            "Would you like me to check the logs next?"
        ));
    }

    #[test]
    fn long_substantive_answer_is_not_a_promise() {
        let long = format!(
            "Here is the summary you asked for. {} I'll check back later.",
            "The service restarted cleanly and memory usage is stable. ".repeat(12)
        );
        assert!(!looks_like_unfulfilled_promise(&long));
    }

    #[test]
    fn empty_text_is_not_a_promise() {
        assert!(!looks_like_unfulfilled_promise("   "));
    }
}
