//! Scripted collaborators for session and turn tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use vox_common::{Error, MemoryConfig, SpeechConfig};

use crate::memory::ConversationMemory;
use crate::metrics::LatencyTracker;
use crate::provider::{ChatMessage, LanguageModel, ProviderError, TokenStream};
use crate::stt::{SpeechToText, SttCommand, SttEvent, SttHandle, SttStream};
use crate::tts::SpeechSynthesizer;

use super::SessionContext;

/// One scripted `stream` call.
pub struct TurnScript {
    tokens: Vec<Result<String, ProviderError>>,
    hold_open: bool,
    fail_call: bool,
}

impl TurnScript {
    /// Stream these tokens, then end the reply.
    pub fn reply(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| Ok(t.to_string())).collect(),
            hold_open: false,
            fail_call: false,
        }
    }

    /// Stream these tokens, then stay silent with the stream open. The
    /// turn can only end through cancellation.
    pub fn reply_then_hold(tokens: &[&str]) -> Self {
        Self {
            hold_open: true,
            ..Self::reply(tokens)
        }
    }

    /// Fail the `stream` call itself.
    pub fn fail() -> Self {
        Self {
            tokens: Vec::new(),
            hold_open: false,
            fail_call: true,
        }
    }

    /// Stream these tokens, then fail mid-stream.
    pub fn fail_mid_stream(tokens: &[&str]) -> Self {
        let mut script = Self::reply(tokens);
        script.tokens.push(Err(scripted_error()));
        script
    }
}

fn scripted_error() -> ProviderError {
    ProviderError {
        provider: "scripted".to_string(),
        message: "model unavailable".to_string(),
        status_code: Some(500),
    }
}

/// Language model that plays back one script per `stream` call.
///
/// Calls beyond the scripted ones return an immediately empty reply.
pub struct ScriptedModel {
    scripts: Mutex<VecDeque<TurnScript>>,
    histories: Mutex<Vec<Vec<ChatMessage>>>,
    held: Mutex<Vec<mpsc::Sender<Result<String, ProviderError>>>>,
}

impl ScriptedModel {
    pub fn new(scripts: Vec<TurnScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            histories: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn single(script: TurnScript) -> Self {
        Self::new(vec![script])
    }

    /// Histories received so far, one per `stream` call.
    pub fn histories(&self) -> Vec<Vec<ChatMessage>> {
        self.histories.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _history: &[ChatMessage]) -> Result<String, ProviderError> {
        Ok("scripted reply".to_string())
    }

    async fn stream(&self, history: &[ChatMessage]) -> Result<TokenStream, ProviderError> {
        self.histories.lock().unwrap().push(history.to_vec());

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| TurnScript::reply(&[]));
        if script.fail_call {
            return Err(scripted_error());
        }

        let (tx, rx) = mpsc::channel(64);
        for token in script.tokens {
            let _ = tx.try_send(token);
        }
        if script.hold_open {
            // Parking the sender keeps the stream open without a task.
            self.held.lock().unwrap().push(tx);
        }
        Ok(rx)
    }

    async fn summarize(&self, _history: &[ChatMessage]) -> Result<String, ProviderError> {
        Ok("scripted summary".to_string())
    }
}

/// Synthesizer with deterministic output and scriptable failures.
pub struct FixedSynthesizer {
    calls: AtomicUsize,
    fail_first: usize,
    bytes_per_call: Option<usize>,
}

impl FixedSynthesizer {
    /// Return the spoken text itself as audio bytes.
    pub fn echoing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            bytes_per_call: None,
        }
    }

    /// Fail the first `n` calls, echo afterwards.
    pub fn failing_first(n: usize) -> Self {
        Self {
            fail_first: n,
            ..Self::echoing()
        }
    }

    /// Emit `len` patterned bytes regardless of the text.
    pub fn emitting(len: usize) -> Self {
        Self {
            bytes_per_call: Some(len),
            ..Self::echoing()
        }
    }

    /// The byte pattern produced by [`emitting`](Self::emitting).
    pub fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for FixedSynthesizer {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn synthesize(&self, text: &str) -> vox_common::Result<Vec<u8>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(Error::Tts("synthesis unavailable".to_string()));
        }
        Ok(match self.bytes_per_call {
            Some(len) => Self::pattern(len),
            None => text.as_bytes().to_vec(),
        })
    }
}

/// Recognizer whose stream is driven by the test through channels.
///
/// `with_channels` hands back the event sender and command receiver so a
/// test can inject transcripts and observe forwarded audio. The stream can
/// be opened once.
pub struct ChannelRecognizer {
    stream: Mutex<Option<SttStream>>,
    fail: bool,
}

impl ChannelRecognizer {
    pub fn with_channels() -> (
        Arc<Self>,
        mpsc::Sender<SttEvent>,
        mpsc::Receiver<SttCommand>,
    ) {
        let (events_tx, events_rx) = mpsc::channel(32);
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let stream = SttStream {
            events: events_rx,
            handle: SttHandle::new(commands_tx),
        };
        let recognizer = Arc::new(Self {
            stream: Mutex::new(Some(stream)),
            fail: false,
        });
        (recognizer, events_tx, commands_rx)
    }

    /// Recognizer whose `open_stream` always fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            stream: Mutex::new(None),
            fail: true,
        })
    }
}

#[async_trait]
impl SpeechToText for ChannelRecognizer {
    fn name(&self) -> &str {
        "channel"
    }

    async fn open_stream(&self) -> vox_common::Result<SttStream> {
        if self.fail {
            return Err(Error::Stt("no stream available".to_string()));
        }
        self.stream
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Stt("stream already opened".to_string()))
    }
}

/// Session context over scripted collaborators and fresh state.
pub fn test_context(
    model: Arc<dyn LanguageModel>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    recognizer: Arc<dyn SpeechToText>,
) -> SessionContext {
    SessionContext {
        model,
        recognizer,
        synthesizer,
        memory: Arc::new(ConversationMemory::new(MemoryConfig::default(), None)),
        metrics: Arc::new(LatencyTracker::new()),
        speech: SpeechConfig::default(),
    }
}
