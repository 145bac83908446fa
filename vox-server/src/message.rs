//! Wire protocol for the voice WebSocket.
//!
//! Text frames carry JSON tagged with a `type` field in both directions.
//! Binary frames carry raw PCM audio: client to server is microphone input
//! forwarded to speech recognition, server to client is synthesized speech
//! in fixed-size chunks.

use serde::{Deserialize, Serialize};

/// Synthesized audio is sent to the client in chunks of this many bytes.
pub const AUDIO_CHUNK_BYTES: usize = 4096;

/// Server-to-client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Session established, sent once after the upgrade.
    Connected {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// Live transcript, interim or final, for display only.
    Transcript {
        text: String,
        #[serde(rename = "isFinal")]
        is_final: bool,
    },
    /// An utterance was dispatched and a response is being generated.
    Thinking,
    /// First synthesized sentence is about to play.
    Speaking,
    /// Audio stream begins. `total_bytes` is known only for single-shot
    /// synthesis; streamed turns leave it unset.
    AudioStart {
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        encoding: String,
        #[serde(rename = "totalBytes", skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
    },
    /// Audio stream for the current turn is complete.
    AudioEnd,
    /// The in-flight response was cancelled by a barge-in.
    AudioInterrupted,
    /// Full response text for the finished turn.
    Response { text: String },
    /// Recoverable failure surfaced to the client.
    Error { message: String },
}

impl ServerEvent {
    /// Serialize to the wire representation.
    ///
    /// These enums serialize infallibly; an error here would mean a bug in
    /// the type definitions, so it degrades to an empty object rather than
    /// propagating.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Client-to-server control messages.
///
/// Anything with an unrecognized `type`, and any text frame that is not
/// valid JSON, is logged and ignored rather than failing the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Terminate the session and release every resource.
    End,
    /// Discard conversation history, keep the session alive.
    Clear,
    /// Cancel the in-flight response without supplying new speech.
    Interrupt,
}

impl ClientCommand {
    /// Parse a text frame into a command.
    ///
    /// Returns `None` for malformed JSON and for unknown `type` values,
    /// logging each case at a non-fatal level.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(text) {
            Ok(cmd) => Some(cmd),
            Err(_) => {
                match serde_json::from_str::<serde_json::Value>(text) {
                    Ok(value) => {
                        let kind = value
                            .get("type")
                            .and_then(|t| t.as_str())
                            .unwrap_or("<missing>");
                        tracing::warn!(kind = %kind, "Ignoring unknown control message type");
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Ignoring malformed control frame");
                    }
                }
                None
            }
        }
    }
}
