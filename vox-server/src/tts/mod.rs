//! Speech synthesis abstraction.
//!
//! Replies are synthesized one sentence at a time so audio starts flowing
//! before the full reply exists. Synthesizers return raw audio bytes; the
//! session layer handles chunking and transport framing.

mod deepgram;
mod resilient;

pub use deepgram::DeepgramTts;
pub use resilient::ResilientSynthesizer;

use crate::provider::ResilienceConfig;
use async_trait::async_trait;
use std::sync::Arc;
use vox_common::{Result, SpeechConfig};

/// Converts text into raw audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Synthesize `text` into raw audio bytes.
    ///
    /// An empty result is valid; callers skip sending silent output.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Build the synthesizer selected by `config`, wrapped with retry.
pub fn create_synthesizer(
    config: &SpeechConfig,
    api_key: &str,
) -> anyhow::Result<Arc<dyn SpeechSynthesizer>> {
    let inner: Arc<dyn SpeechSynthesizer> = match config.tts_provider.to_lowercase().as_str() {
        "deepgram" => Arc::new(DeepgramTts::new(config, api_key)),
        other => anyhow::bail!("Unsupported speech synthesis provider: {other}"),
    };

    tracing::info!(
        provider = %inner.name(),
        voice = %config.tts_voice,
        "Speech synthesizer initialized"
    );

    // Sentence-sized requests recover faster than model calls.
    let retry = ResilienceConfig {
        max_retries: 3,
        base_backoff_ms: 300,
        max_backoff_ms: 2000,
    };
    Ok(Arc::new(ResilientSynthesizer::new(inner, retry)))
}
