//! Streaming speech recognition.
//!
//! A recognition stream accepts raw audio chunks and emits transcript
//! events as the provider produces them. Streams reconnect on their own
//! after transient failures; callers only see an [`SttEvent::Closed`]
//! when recovery has been given up.

mod deepgram;

pub use deepgram::DeepgramStt;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use vox_common::SpeechConfig;

/// Transcription events emitted by a live recognition stream.
#[derive(Debug, Clone)]
pub enum SttEvent {
    /// A transcript fragment for the current utterance.
    Transcript {
        text: String,
        is_final: bool,
        speech_final: bool,
        confidence: f64,
    },
    /// Silence detected after speech; the utterance is complete.
    UtteranceEnd,
    /// Speech detected after silence.
    SpeechStarted,
    /// A transient failure. The stream is reconnecting on its own.
    Error(String),
    /// The stream is gone and will not recover.
    Closed,
}

/// Commands accepted by a live recognition stream.
#[derive(Debug)]
pub enum SttCommand {
    /// Raw PCM audio to transcribe.
    Audio(Vec<u8>),
    /// Flush pending audio and close the stream.
    Finish,
}

/// Handle for pushing audio into a live recognition stream.
#[derive(Clone)]
pub struct SttHandle {
    commands: mpsc::Sender<SttCommand>,
}

impl SttHandle {
    /// Wrap the command side of a recognition stream.
    pub fn new(commands: mpsc::Sender<SttCommand>) -> Self {
        Self { commands }
    }

    /// Forward an audio chunk. Returns false when the stream is gone.
    pub async fn send_audio(&self, audio: Vec<u8>) -> bool {
        self.commands.send(SttCommand::Audio(audio)).await.is_ok()
    }

    /// Flush the provider and close the stream.
    pub async fn finish(&self) {
        let _ = self.commands.send(SttCommand::Finish).await;
    }
}

/// A live recognition stream: transcript events plus an audio handle.
pub struct SttStream {
    pub events: mpsc::Receiver<SttEvent>,
    pub handle: SttHandle,
}

/// Streaming speech-to-text provider.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Open a live recognition stream.
    async fn open_stream(&self) -> vox_common::Result<SttStream>;
}

/// Build the configured recognition provider.
pub fn create_recognizer(
    config: &SpeechConfig,
    api_key: &str,
) -> anyhow::Result<Arc<dyn SpeechToText>> {
    match config.stt_provider.to_lowercase().as_str() {
        "deepgram" => Ok(Arc::new(DeepgramStt::new(config, api_key))),
        other => anyhow::bail!("Unsupported STT provider: {other}"),
    }
}
