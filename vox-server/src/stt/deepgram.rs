//! Deepgram live transcription client.
//!
//! Speaks the raw `/v1/listen` WebSocket protocol: binary frames carry
//! audio in, JSON text frames carry transcripts out. A `KeepAlive`
//! message every few seconds stops Deepgram from timing the socket out
//! between utterances, and `CloseStream` asks it to flush and finish.

use super::{SpeechToText, SttCommand, SttEvent, SttHandle, SttStream};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;
use vox_common::{Error, Result, SpeechConfig};

const LIVE_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Silence window after which Deepgram reports the utterance as ended.
const UTTERANCE_END_MS: u32 = 1000;

/// Deepgram drops idle sockets after ~10s without traffic.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(8);

const RECONNECT_MAX_ATTEMPTS: u32 = 5;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const COMMAND_CHANNEL_CAPACITY: usize = 64;

type WsSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Streaming recognizer backed by Deepgram's live API.
pub struct DeepgramStt {
    api_key: String,
    config: SpeechConfig,
}

impl DeepgramStt {
    pub fn new(config: &SpeechConfig, api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            config: config.clone(),
        }
    }
}

#[async_trait]
impl SpeechToText for DeepgramStt {
    fn name(&self) -> &str {
        "deepgram"
    }

    async fn open_stream(&self) -> Result<SttStream> {
        let socket = connect(&self.api_key, &self.config).await?;
        tracing::info!(model = %self.config.stt_model, "Recognition stream opened");

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let api_key = self.api_key.clone();
        let config = self.config.clone();
        tokio::spawn(run_stream(socket, commands_rx, events_tx, api_key, config));

        Ok(SttStream {
            events: events_rx,
            handle: SttHandle::new(commands_tx),
        })
    }
}

/// Run one logical stream across however many socket connections it takes.
async fn run_stream(
    mut socket: WsSocket,
    mut commands: mpsc::Receiver<SttCommand>,
    events: mpsc::Sender<SttEvent>,
    api_key: String,
    config: SpeechConfig,
) {
    loop {
        match run_connection(socket, &mut commands, &events).await {
            ConnectionEnd::Finished | ConnectionEnd::ClientGone => return,
            ConnectionEnd::Dropped(reason) => {
                tracing::warn!(reason = %reason, "Recognition connection dropped");
                if events.send(SttEvent::Error(reason)).await.is_err() {
                    return;
                }
                match reconnect(&api_key, &config).await {
                    Ok(next) => socket = next,
                    Err(e) => {
                        tracing::error!(error = %e, "Recognition stream lost");
                        let _ = events.send(SttEvent::Closed).await;
                        return;
                    }
                }
            }
        }
    }
}

enum ConnectionEnd {
    /// Orderly shutdown after `CloseStream`.
    Finished,
    /// The caller dropped the handle or stopped listening.
    ClientGone,
    /// The socket failed or closed unexpectedly.
    Dropped(String),
}

async fn run_connection(
    socket: WsSocket,
    commands: &mut mpsc::Receiver<SttCommand>,
    events: &mpsc::Sender<SttEvent>,
) -> ConnectionEnd {
    let (mut write, mut read) = socket.split();
    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + KEEPALIVE_INTERVAL,
        KEEPALIVE_INTERVAL,
    );
    let mut finishing = false;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SttCommand::Audio(audio)) => {
                    if let Err(e) = write.send(Message::Binary(audio)).await {
                        return ConnectionEnd::Dropped(format!("audio send failed: {e}"));
                    }
                }
                Some(SttCommand::Finish) => {
                    finishing = true;
                    if write
                        .send(Message::Text(r#"{"type":"CloseStream"}"#.into()))
                        .await
                        .is_err()
                    {
                        return ConnectionEnd::Finished;
                    }
                }
                None => {
                    let _ = write
                        .send(Message::Text(r#"{"type":"CloseStream"}"#.into()))
                        .await;
                    return ConnectionEnd::ClientGone;
                }
            },
            _ = keepalive.tick() => {
                if let Err(e) = write
                    .send(Message::Text(r#"{"type":"KeepAlive"}"#.into()))
                    .await
                {
                    if finishing {
                        return ConnectionEnd::Finished;
                    }
                    return ConnectionEnd::Dropped(format!("keepalive failed: {e}"));
                }
                tracing::trace!("Recognition keepalive sent");
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if !handle_server_message(&text, events).await {
                        return ConnectionEnd::ClientGone;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    if finishing {
                        return ConnectionEnd::Finished;
                    }
                    return ConnectionEnd::Dropped("connection closed".into());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if finishing {
                        return ConnectionEnd::Finished;
                    }
                    return ConnectionEnd::Dropped(format!("read failed: {e}"));
                }
            },
        }
    }
}

/// Translate one server message into an event. Returns false when the
/// event receiver is gone.
async fn handle_server_message(text: &str, events: &mpsc::Sender<SttEvent>) -> bool {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "Unrecognized recognition message");
            return true;
        }
    };

    let event = match message {
        ServerMessage::Results {
            channel,
            is_final,
            speech_final,
        } => {
            let Some(alternative) = channel.alternatives.into_iter().next() else {
                return true;
            };
            if alternative.transcript.trim().is_empty() {
                return true;
            }
            tracing::debug!(is_final, chars = alternative.transcript.len(), "Transcript received");
            SttEvent::Transcript {
                text: alternative.transcript,
                is_final,
                speech_final,
                confidence: alternative.confidence,
            }
        }
        ServerMessage::UtteranceEnd => {
            tracing::debug!("Utterance ended (silence detected)");
            SttEvent::UtteranceEnd
        }
        ServerMessage::SpeechStarted => {
            tracing::debug!("Speech detected");
            SttEvent::SpeechStarted
        }
        ServerMessage::Metadata | ServerMessage::Other => return true,
    };

    events.send(event).await.is_ok()
}

async fn connect(api_key: &str, config: &SpeechConfig) -> Result<WsSocket> {
    let url = live_url(config)?;
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::Stt(format!("Invalid request: {e}")))?;
    let auth = HeaderValue::from_str(&format!("Token {api_key}"))
        .map_err(|e| Error::Stt(format!("Invalid API key: {e}")))?;
    request.headers_mut().insert("Authorization", auth);

    let (socket, _) = connect_async(request)
        .await
        .map_err(|e| Error::Stt(format!("Connection failed: {e}")))?;
    Ok(socket)
}

fn live_url(config: &SpeechConfig) -> Result<Url> {
    let mut url =
        Url::parse(LIVE_URL).map_err(|e| Error::Stt(format!("Invalid endpoint: {e}")))?;
    url.query_pairs_mut()
        .append_pair("model", &config.stt_model)
        .append_pair("language", "en")
        .append_pair("smart_format", "true")
        .append_pair("punctuate", "true")
        .append_pair("interim_results", "true")
        .append_pair("utterance_end_ms", &UTTERANCE_END_MS.to_string())
        .append_pair("vad_events", "true")
        .append_pair("encoding", &config.input_encoding)
        .append_pair("sample_rate", &config.input_sample_rate.to_string());
    Ok(url)
}

async fn reconnect(api_key: &str, config: &SpeechConfig) -> Result<WsSocket> {
    for attempt in 1..=RECONNECT_MAX_ATTEMPTS {
        let delay = reconnect_delay(attempt);
        tracing::info!(
            attempt,
            max_attempts = RECONNECT_MAX_ATTEMPTS,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting recognition stream"
        );
        tokio::time::sleep(delay).await;

        match connect(api_key, config).await {
            Ok(socket) => {
                tracing::info!(attempt, "Recognition stream reconnected");
                return Ok(socket);
            }
            Err(e) => {
                tracing::error!(attempt, error = %e, "Reconnection attempt failed");
            }
        }
    }
    Err(Error::Stt(format!(
        "Reconnection failed after {RECONNECT_MAX_ATTEMPTS} attempts"
    )))
}

fn reconnect_delay(attempt: u32) -> Duration {
    let base = Duration::from_millis(
        1000_u64
            .saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)))
            .min(10_000),
    );
    // ±20% jitter.
    base.mul_f64(1.0 + 0.2 * (rand::random::<f64>() * 2.0 - 1.0))
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ServerMessage {
    Results {
        channel: ResultsChannel,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        speech_final: bool,
    },
    UtteranceEnd,
    SpeechStarted,
    Metadata,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResultsChannel {
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f64,
}
