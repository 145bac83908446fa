//! Retry wrapper for model backends.
//!
//! Wraps a [`LanguageModel`] with exponential backoff so a transient API
//! failure does not end the conversation turn.

use super::{ChatMessage, LanguageModel, ProviderError, TokenStream};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds (doubles with each retry).
    pub base_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 3000,
        }
    }
}

/// A model wrapper that retries failed calls with exponential backoff.
///
/// Streaming retries cover stream creation only. Once tokens are flowing,
/// a failure surfaces in-stream and the current turn handles it.
pub struct ResilientModel {
    inner: Arc<dyn LanguageModel>,
    config: ResilienceConfig,
}

impl ResilientModel {
    /// Wrap a model with the given retry configuration.
    pub fn new(inner: Arc<dyn LanguageModel>, config: ResilienceConfig) -> Self {
        Self { inner, config }
    }

    /// Calculate backoff delay for a given attempt.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .config
            .base_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.config.max_backoff_ms);
        Duration::from_millis(delay_ms)
    }

    async fn with_retry<T, Fut>(
        &self,
        op: &'static str,
        mut call: impl FnMut() -> Fut,
    ) -> Result<T, ProviderError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match call().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(
                            provider = self.inner.name(),
                            op,
                            attempt = attempt + 1,
                            "Model call recovered after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempt < self.config.max_retries {
                        // ±20% jitter on the exponential delay.
                        let delay = self
                            .backoff_delay(attempt)
                            .mul_f64(1.0 + 0.2 * (rand::random::<f64>() * 2.0 - 1.0));
                        tracing::warn!(
                            provider = self.inner.name(),
                            op,
                            attempt = attempt + 1,
                            max_attempts = self.config.max_retries + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Model call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        tracing::error!(
                            provider = self.inner.name(),
                            op,
                            attempts = self.config.max_retries + 1,
                            error = %e,
                            "Model call failed after all retries"
                        );
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError {
            provider: self.inner.name().to_string(),
            message: "Retry loop made no attempts".into(),
            status_code: None,
        }))
    }
}

#[async_trait]
impl LanguageModel for ResilientModel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, history: &[ChatMessage]) -> Result<String, ProviderError> {
        self.with_retry("generate", || self.inner.generate(history))
            .await
    }

    async fn stream(&self, history: &[ChatMessage]) -> Result<TokenStream, ProviderError> {
        self.with_retry("stream", || self.inner.stream(history))
            .await
    }

    async fn summarize(&self, history: &[ChatMessage]) -> Result<String, ProviderError> {
        self.with_retry("summarize", || self.inner.summarize(history))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Mock model that fails a fixed number of times before succeeding.
    struct MockModel {
        calls: Arc<AtomicUsize>,
        fail_until: usize,
        response: &'static str,
    }

    impl MockModel {
        fn new(fail_until: usize, response: &'static str) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: Arc::clone(&calls),
                    fail_until,
                    response,
                },
                calls,
            )
        }

        fn attempt(&self) -> Result<(), ProviderError> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_until {
                return Err(ProviderError {
                    provider: "mock".into(),
                    message: "temporary failure".into(),
                    status_code: Some(500),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl LanguageModel for MockModel {
        fn name(&self) -> &str {
            "mock"
        }

        async fn generate(&self, _history: &[ChatMessage]) -> Result<String, ProviderError> {
            self.attempt()?;
            Ok(self.response.to_string())
        }

        async fn stream(&self, _history: &[ChatMessage]) -> Result<TokenStream, ProviderError> {
            self.attempt()?;
            let (tx, rx) = mpsc::channel(8);
            tx.send(Ok(self.response.to_string())).await.ok();
            Ok(rx)
        }

        async fn summarize(&self, _history: &[ChatMessage]) -> Result<String, ProviderError> {
            self.attempt()?;
            Ok(format!("summary: {}", self.response))
        }
    }

    fn fast_config(max_retries: u32) -> ResilienceConfig {
        ResilienceConfig {
            max_retries,
            base_backoff_ms: 1,
            max_backoff_ms: 10,
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let (mock, calls) = MockModel::new(0, "success");
        let model = ResilientModel::new(Arc::new(mock), fast_config(2));

        let reply = model.generate(&[]).await.unwrap();
        assert_eq!(reply, "success");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let (mock, calls) = MockModel::new(1, "recovered");
        let model = ResilientModel::new(Arc::new(mock), fast_config(2));

        let reply = model.generate(&[]).await.unwrap();
        assert_eq!(reply, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2); // 1 fail + 1 success
    }

    #[tokio::test]
    async fn gives_up_after_retries_exhausted() {
        let (mock, calls) = MockModel::new(usize::MAX, "never");
        let model = ResilientModel::new(Arc::new(mock), fast_config(1));

        let err = model.generate(&[]).await.unwrap_err();
        assert!(err.message.contains("temporary failure"));
        assert_eq!(calls.load(Ordering::SeqCst), 2); // initial + 1 retry
    }

    #[tokio::test]
    async fn stream_creation_is_retried() {
        let (mock, calls) = MockModel::new(1, "token");
        let model = ResilientModel::new(Arc::new(mock), fast_config(2));

        let mut tokens = model.stream(&[]).await.unwrap();
        assert_eq!(tokens.recv().await.unwrap().unwrap(), "token");
        assert!(tokens.recv().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn name_reports_inner_provider() {
        let (mock, _) = MockModel::new(0, "hi");
        let model = ResilientModel::new(Arc::new(mock), ResilienceConfig::default());
        assert_eq!(model.name(), "mock");
    }

    #[test]
    fn backoff_doubles_with_attempts() {
        let (mock, _) = MockModel::new(0, "hi");
        let model = ResilientModel::new(Arc::new(mock), ResilienceConfig::default());

        // Base is 500ms
        assert_eq!(model.backoff_delay(0).as_millis(), 500);
        assert_eq!(model.backoff_delay(1).as_millis(), 1000);
        assert_eq!(model.backoff_delay(2).as_millis(), 2000);
    }

    #[test]
    fn backoff_caps_at_max() {
        let (mock, _) = MockModel::new(0, "hi");
        let model = ResilientModel::new(Arc::new(mock), ResilienceConfig::default());

        assert_eq!(model.backoff_delay(10).as_millis(), 3000);
    }
}
