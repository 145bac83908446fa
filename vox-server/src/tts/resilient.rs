//! Retry wrapper for speech synthesis.

use super::SpeechSynthesizer;
use crate::provider::ResilienceConfig;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use vox_common::{Error, Result};

/// A synthesizer wrapper that retries failed calls with exponential backoff.
pub struct ResilientSynthesizer {
    inner: Arc<dyn SpeechSynthesizer>,
    config: ResilienceConfig,
}

impl ResilientSynthesizer {
    pub fn new(inner: Arc<dyn SpeechSynthesizer>, config: ResilienceConfig) -> Self {
        Self { inner, config }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .config
            .base_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.config.max_backoff_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
impl SpeechSynthesizer for ResilientSynthesizer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.inner.synthesize(text).await {
                Ok(audio) => {
                    if attempt > 0 {
                        tracing::info!(attempt = attempt + 1, "Synthesis recovered after retry");
                    }
                    return Ok(audio);
                }
                Err(e) => {
                    if attempt < self.config.max_retries {
                        let delay = self.backoff_delay(attempt);
                        tracing::warn!(
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Synthesis failed, retrying"
                        );
                        // ±20% jitter on the exponential delay.
                        tokio::time::sleep(
                            delay.mul_f64(1.0 + 0.2 * (rand::random::<f64>() * 2.0 - 1.0)),
                        )
                        .await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| Error::Tts("synthesis failed".into()));
        tracing::error!(
            attempts = self.config.max_retries + 1,
            error = %error,
            "Synthesis failed after all retries"
        );
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock synthesizer that fails a fixed number of times before succeeding.
    struct MockSynthesizer {
        calls: Arc<AtomicUsize>,
        fail_until: usize,
    }

    impl MockSynthesizer {
        fn new(fail_until: usize) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: Arc::clone(&calls),
                    fail_until,
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for MockSynthesizer {
        fn name(&self) -> &str {
            "mock"
        }

        async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_until {
                return Err(Error::Tts("temporary failure".into()));
            }
            Ok(text.as_bytes().to_vec())
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
        let (mock, calls) = MockSynthesizer::new(0);
        let synthesizer = ResilientSynthesizer::new(Arc::new(mock), fast_config(2));

        let audio = synthesizer.synthesize("hello").await.unwrap();
        assert_eq!(audio, b"hello");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let (mock, calls) = MockSynthesizer::new(1);
        let synthesizer = ResilientSynthesizer::new(Arc::new(mock), fast_config(2));

        let audio = synthesizer.synthesize("hello").await.unwrap();
        assert_eq!(audio, b"hello");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_retries_exhausted() {
        let (mock, calls) = MockSynthesizer::new(usize::MAX);
        let synthesizer = ResilientSynthesizer::new(Arc::new(mock), fast_config(1));

        let result = synthesizer.synthesize("hello").await;
        assert!(matches!(result, Err(Error::Tts(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let (mock, _) = MockSynthesizer::new(0);
        let synthesizer = ResilientSynthesizer::new(
            Arc::new(mock),
            ResilienceConfig {
                max_retries: 3,
                base_backoff_ms: 300,
                max_backoff_ms: 2000,
            },
        );

        assert_eq!(synthesizer.backoff_delay(0), Duration::from_millis(300));
        assert_eq!(synthesizer.backoff_delay(1), Duration::from_millis(600));
        assert_eq!(synthesizer.backoff_delay(2), Duration::from_millis(1200));
        assert_eq!(synthesizer.backoff_delay(3), Duration::from_millis(2000));
    }
}
