//! Error types for the Colloquy domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! Recognized operational failures (tool errors, stuck loops, per-turn
//! timeouts) never appear here — they are converted to user-facing text
//! inside the session. Only collaborator and infrastructure faults
//! propagate as errors.

use thiserror::Error;

/// The top-level error type for all Colloquy operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Routing errors ---
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    // --- Transcript storage errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Errors from model routing and the fallback chain.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Every attempt in the fallback policy failed. Carries the cause of
    /// each attempt so nothing is silently dropped.
    #[error("All {} routing attempts failed: {}", attempts.len(), describe_attempts(attempts))]
    Exhausted {
        attempts: Vec<FailedAttempt>,
    },

    #[error("No provider registered under '{0}'")]
    UnknownProvider(String),
}

/// One failed attempt in a fallback chain.
#[derive(Debug)]
pub struct FailedAttempt {
    /// Which provider was tried
    pub provider: String,
    /// Why it failed
    pub cause: ProviderError,
}

fn describe_attempts(attempts: &[FailedAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.provider, a.cause))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Transcript not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
