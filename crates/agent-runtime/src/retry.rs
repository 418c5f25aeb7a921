//! Retry wrapper for providers.
//!
//! The agentic loop never retries a failed provider call. Wrap a provider in
//! [`RetryingProvider`] to re-attempt rate limits and transport failures with
//! exponential backoff before the loop sees the error.

use std::sync::Arc;
use std::time::Duration;

use agent_core::{
    error::ProviderError,
    message::HistoryEntry,
    provider::{GenerateResult, GenerationOptions, LlmProvider, ModelInfo, ProviderInfo},
    tool::ToolSchema,
};
use async_trait::async_trait;

/// Exponential backoff settings
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Provider that re-attempts retryable failures of an inner provider
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>) -> Self {
        Self::with_policy(inner, RetryPolicy::default())
    }

    pub fn with_policy(inner: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    fn info(&self) -> ProviderInfo {
        self.inner.info()
    }

    async fn generate(
        &self,
        history: &[HistoryEntry],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<GenerateResult, ProviderError> {
        let mut attempt = 1;
        loop {
            match self.inner.generate(history, tools, options).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }

    fn model(&self, model_id: &str) -> Option<ModelInfo> {
        self.inner.model(model_id)
    }

    fn estimate_tokens(&self, text: &str) -> u64 {
        self.inner.estimate_tokens(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::provider::TokenCounting;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        error: ProviderError,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for Flaky {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                id: "flaky".into(),
                name: "Flaky".into(),
                models: vec![],
                token_counting: TokenCounting::Estimated,
            }
        }

        async fn generate(
            &self,
            _history: &[HistoryEntry],
            _tools: &[ToolSchema],
            _options: &GenerationOptions,
        ) -> Result<GenerateResult, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(GenerateResult::text("ok"))
            }
        }
    }

    fn instant() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn flaky(failures: u32, error: ProviderError) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            error,
            calls: AtomicU32::new(0),
        })
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_recovers_from_transient_failures() {
        let inner = flaky(2, ProviderError::transport("reset"));
        let provider = RetryingProvider::with_policy(inner.clone(), instant());
        let result = provider
            .generate(&[], &[], &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(result.text, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let inner = flaky(5, ProviderError::rate_limit("429"));
        let provider = RetryingProvider::with_policy(inner.clone(), instant());
        assert!(provider.generate(&[], &[], &GenerationOptions::default()).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_errors_are_not_retried() {
        let inner = flaky(1, ProviderError::auth("bad key"));
        let provider = RetryingProvider::with_policy(inner.clone(), instant());
        assert!(provider.generate(&[], &[], &GenerationOptions::default()).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
