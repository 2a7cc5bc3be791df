//! Provider selection and the fixed fallback chain.
//!
//! `resolve` maps a complexity tier to the configured (provider, model)
//! pair; `call_with_fallback` runs the retry policy: primary attempt, one
//! same-provider retry after a short delay, then one attempt on a distinct
//! fallback provider. Exhaustion surfaces every attempt's cause.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use colloquy_config::{default_max_output_tokens, ModelChoice, RoutingConfig};
use colloquy_core::error::{FailedAttempt, ProviderError, RoutingError};
use colloquy_core::provider::{ChatRequest, ChatResponse, ModelProvider};
use colloquy_core::turn::ConversationId;
use tracing::{info, warn};

use crate::classify::{Classifier, Complexity, ComplexityProbe};

/// The outcome of routing one turn. Computed per turn, never persisted.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// Classified complexity of the query
    pub complexity: Complexity,
    /// Registered provider name to call first
    pub provider: String,
    /// Model identifier
    pub model: String,
    /// Output-token ceiling for this call
    pub max_output_tokens: u32,
}

/// Routes model calls: classification, provider registry, fallback policy.
pub struct ModelRouter {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    config: RoutingConfig,
    classifier: Classifier,
}

impl ModelRouter {
    /// Create a router with no registered providers.
    pub fn new(config: RoutingConfig) -> Self {
        let classifier = Classifier::new(&config);
        Self {
            providers: HashMap::new(),
            config,
            classifier,
        }
    }

    /// Attach an auxiliary complexity probe.
    pub fn with_probe(mut self, probe: Box<dyn ComplexityProbe>) -> Self {
        self.classifier = Classifier::new(&self.config).with_probe(probe);
        self
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get a provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(name).cloned()
    }

    /// Classify a query's complexity (see [`Classifier::classify`]).
    pub async fn classify(
        &self,
        conversation: &ConversationId,
        query: &str,
        recent_context: &str,
        has_active_task: bool,
    ) -> Complexity {
        self.classifier
            .classify(conversation, query, recent_context, has_active_task)
            .await
    }

    /// Drop per-conversation routing state (conversation reset).
    pub fn forget(&self, conversation: &ConversationId) {
        self.classifier.forget(conversation);
    }

    /// Map a complexity tier to a concrete routing decision.
    pub fn resolve(&self, complexity: Complexity) -> RoutingDecision {
        let choice: &ModelChoice = match complexity {
            Complexity::Simple => &self.config.simple,
            Complexity::Complex => &self.config.complex,
        };

        RoutingDecision {
            complexity,
            provider: choice.provider.clone(),
            model: choice.model.clone(),
            max_output_tokens: choice
                .max_output_tokens
                .unwrap_or_else(|| default_max_output_tokens(&choice.model)),
        }
    }

    /// Invoke the decided provider with the fixed fallback policy.
    ///
    /// Attempt order:
    /// 1. primary provider
    /// 2. primary provider again, after `retry_delay_ms`
    /// 3. the configured fallback provider
    ///
    /// The terminal error carries the cause of every attempt.
    pub async fn call_with_fallback(
        &self,
        request: ChatRequest,
        decision: &RoutingDecision,
    ) -> std::result::Result<ChatResponse, RoutingError> {
        let mut attempts: Vec<FailedAttempt> = Vec::new();

        let primary = self
            .get(&decision.provider)
            .ok_or_else(|| RoutingError::UnknownProvider(decision.provider.clone()))?;

        // Attempt 1: primary
        match primary.chat(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                warn!(
                    provider = %decision.provider,
                    error = %e,
                    "Primary attempt failed, retrying after delay"
                );
                attempts.push(FailedAttempt {
                    provider: decision.provider.clone(),
                    cause: e,
                });
            }
        }

        // Attempt 2: same provider after a short fixed delay
        tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
        match primary.chat(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                warn!(
                    provider = %decision.provider,
                    error = %e,
                    "Primary retry failed, falling back"
                );
                attempts.push(FailedAttempt {
                    provider: decision.provider.clone(),
                    cause: e,
                });
            }
        }

        // Attempt 3: distinct fallback provider
        let fallback_name = &self.config.fallback_provider;
        match self.get(fallback_name) {
            Some(fallback) => {
                info!(provider = %fallback_name, "Trying fallback provider");
                match fallback.chat(request).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        warn!(provider = %fallback_name, error = %e, "Fallback provider failed");
                        attempts.push(FailedAttempt {
                            provider: fallback_name.clone(),
                            cause: e,
                        });
                    }
                }
            }
            None => {
                attempts.push(FailedAttempt {
                    provider: fallback_name.clone(),
                    cause: ProviderError::NotConfigured(format!(
                        "fallback provider '{fallback_name}' is not registered"
                    )),
                });
            }
        }

        Err(RoutingError::Exhausted { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use colloquy_core::turn::Turn;
    use std::sync::Mutex;

    /// A mock provider that fails a configurable number of times.
    struct FlakyProvider {
        name: String,
        failures_before_success: usize,
        calls: Mutex<usize>,
    }

    impl FlakyProvider {
        fn new(name: &str, failures_before_success: usize) -> Self {
            Self {
                name: name.into(),
                failures_before_success,
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ModelProvider for FlakyProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn chat(
            &self,
            _request: ChatRequest,
        ) -> std::result::Result<ChatResponse, ProviderError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls <= self.failures_before_success {
                Err(ProviderError::ApiError {
                    status_code: 500,
                    message: "Internal Server Error".into(),
                })
            } else {
                Ok(ChatResponse {
                    turn: Turn::assistant("ok"),
                    usage: None,
                    model: "test-model".into(),
                })
            }
        }
    }

    fn test_request() -> ChatRequest {
        ChatRequest {
            model: "test".into(),
            turns: vec![Turn::user("hello")],
            temperature: 0.7,
            max_output_tokens: None,
            tools: vec![],
        }
    }

    fn router_with(
        primary: Arc<FlakyProvider>,
        fallback: Arc<FlakyProvider>,
    ) -> ModelRouter {
        let mut config = RoutingConfig::default();
        config.simple.provider = "primary".into();
        config.complex.provider = "primary".into();
        config.fallback_provider = "fallback".into();
        config.retry_delay_ms = 1;

        let mut router = ModelRouter::new(config);
        router.register("primary", primary);
        router.register("fallback", fallback);
        router
    }

    #[test]
    fn resolve_uses_model_table_for_token_ceiling() {
        let router = ModelRouter::new(RoutingConfig::default());
        let decision = router.resolve(Complexity::Complex);
        assert_eq!(decision.model, "anthropic/claude-sonnet-4");
        assert_eq!(decision.max_output_tokens, 8192);

        let decision = router.resolve(Complexity::Simple);
        assert_eq!(decision.max_output_tokens, 2048);
    }

    #[test]
    fn resolve_honors_config_override() {
        let mut config = RoutingConfig::default();
        config.simple.max_output_tokens = Some(512);
        let router = ModelRouter::new(config);
        assert_eq!(router.resolve(Complexity::Simple).max_output_tokens, 512);
    }

    #[tokio::test]
    async fn first_attempt_succeeds() {
        let primary = Arc::new(FlakyProvider::new("primary", 0));
        let fallback = Arc::new(FlakyProvider::new("fallback", 0));
        let router = router_with(primary.clone(), fallback.clone());

        let decision = router.resolve(Complexity::Simple);
        let result = router.call_with_fallback(test_request(), &decision).await;
        assert!(result.is_ok());
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn retry_same_provider_once() {
        let primary = Arc::new(FlakyProvider::new("primary", 1));
        let fallback = Arc::new(FlakyProvider::new("fallback", 0));
        let router = router_with(primary.clone(), fallback.clone());

        let decision = router.resolve(Complexity::Simple);
        let result = router.call_with_fallback(test_request(), &decision).await;
        assert!(result.is_ok());
        assert_eq!(primary.calls(), 2);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn falls_back_after_two_primary_failures() {
        let primary = Arc::new(FlakyProvider::new("primary", 2));
        let fallback = Arc::new(FlakyProvider::new("fallback", 0));
        let router = router_with(primary.clone(), fallback.clone());

        let decision = router.resolve(Complexity::Simple);
        let result = router.call_with_fallback(test_request(), &decision).await;
        assert!(result.is_ok());
        assert_eq!(primary.calls(), 2);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn exhaustion_carries_all_causes() {
        let primary = Arc::new(FlakyProvider::new("primary", 10));
        let fallback = Arc::new(FlakyProvider::new("fallback", 10));
        let router = router_with(primary.clone(), fallback.clone());

        let decision = router.resolve(Complexity::Simple);
        let err = router
            .call_with_fallback(test_request(), &decision)
            .await
            .unwrap_err();

        match err {
            RoutingError::Exhausted { attempts } => {
                assert_eq!(attempts.len(), 3);
                assert_eq!(attempts[0].provider, "primary");
                assert_eq!(attempts[1].provider, "primary");
                assert_eq!(attempts[2].provider, "fallback");
            }
            other => panic!("Expected Exhausted, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_primary_is_an_error() {
        let router = ModelRouter::new(RoutingConfig::default());
        let decision = RoutingDecision {
            complexity: Complexity::Simple,
            provider: "ghost".into(),
            model: "m".into(),
            max_output_tokens: 1024,
        };
        let err = router
            .call_with_fallback(test_request(), &decision)
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn unregistered_fallback_recorded_as_attempt() {
        let primary = Arc::new(FlakyProvider::new("primary", 10));
        let mut config = RoutingConfig::default();
        config.simple.provider = "primary".into();
        config.fallback_provider = "missing".into();
        config.retry_delay_ms = 1;

        let mut router = ModelRouter::new(config);
        router.register("primary", primary);

        let decision = router.resolve(Complexity::Simple);
        let err = router
            .call_with_fallback(test_request(), &decision)
            .await
            .unwrap_err();

        match err {
            RoutingError::Exhausted { attempts } => {
                assert_eq!(attempts.len(), 3);
                assert!(matches!(
                    attempts[2].cause,
                    ProviderError::NotConfigured(_)
                ));
            }
            other => panic!("Expected Exhausted, got: {other:?}"),
        }
    }
}
