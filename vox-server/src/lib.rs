//! vox-server - Realtime duplex voice conversation service.
//!
//! Clients stream microphone audio over a WebSocket; the server transcribes
//! it, generates a reply with a language model, and streams synthesized
//! speech back, sentence by sentence. The user can talk over the assistant
//! at any point: playback stops and the new utterance gets answered.
//!
//! ## Architecture
//!
//! ```text
//! mic audio → /ws → Session ─→ SpeechToText (Deepgram live)
//!                      │              ↓ transcripts
//!                      ├─→ turn task: LanguageModel → sentences
//!                      │              ↓
//!                      │        SpeechSynthesizer → 4 KiB chunks
//!                      └─→ outbound queue → socket writer → client
//! ```
//!
//! One task per connection owns all conversational state; response turns
//! run as cancellable child tasks so barge-in stays responsive.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod memory;
pub mod message;
pub mod metrics;
pub mod persona;
pub mod provider;
pub mod routes;
pub mod segment;
pub mod session;
pub mod stt;
pub mod tts;
pub mod ws;

pub use memory::ConversationMemory;
pub use message::{ClientCommand, ServerEvent, AUDIO_CHUNK_BYTES};
pub use metrics::{LatencyTracker, SessionStats, Stage, TurnReport};
pub use provider::{create_model, ChatMessage, ChatRole, LanguageModel};
pub use routes::{build_router, build_state, VoxState};
pub use segment::SentenceSegmenter;
pub use session::{OutboundFrame, Session, SessionContext, SessionInput};
pub use stt::{create_recognizer, SpeechToText, SttEvent, SttStream};
pub use tts::{create_synthesizer, SpeechSynthesizer};
