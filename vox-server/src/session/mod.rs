//! Per-connection session coordination.
//!
//! One task owns all conversational state for a connection and runs a
//! single control loop over typed inputs: client frames, recognition
//! events, and turn completion. Response turns run as child tasks and are
//! cancelled cooperatively, so the loop stays free to notice barge-in
//! while audio is playing.

mod aggregator;
#[cfg(test)]
pub(crate) mod testing;
mod turn;

pub use turn::TurnOutcome;

use aggregator::UtteranceAggregator;
use turn::run_turn;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vox_common::SpeechConfig;

use crate::memory::ConversationMemory;
use crate::message::{ClientCommand, ServerEvent};
use crate::metrics::{LatencyTracker, Stage};
use crate::provider::LanguageModel;
use crate::stt::{SpeechToText, SttEvent, SttHandle, SttStream};
use crate::tts::SpeechSynthesizer;

/// Client frames buffered ahead of the session loop.
pub const INPUT_CHANNEL_CAPACITY: usize = 64;

/// Outbound frames buffered ahead of the socket writer. A slow client
/// applies backpressure to synthesis instead of growing an unbounded
/// queue.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 16;

/// Inputs multiplexed into the session loop by the transport.
#[derive(Debug)]
pub enum SessionInput {
    /// Binary frame: raw microphone audio.
    Audio(Vec<u8>),
    /// Parsed control message.
    Command(ClientCommand),
}

/// Frames queued for the socket writer, in delivery order.
///
/// Events and audio share one queue so their relative order survives the
/// hop to the writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Event(ServerEvent),
    Audio(Vec<u8>),
}

/// Collaborators shared by every session, injected at construction.
#[derive(Clone)]
pub struct SessionContext {
    pub model: Arc<dyn LanguageModel>,
    pub recognizer: Arc<dyn SpeechToText>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub memory: Arc<ConversationMemory>,
    pub metrics: Arc<LatencyTracker>,
    pub speech: SpeechConfig,
}

/// A single connection's conversational state machine.
///
/// At most one response turn is in flight at a time. Utterances that
/// complete while a turn runs wait in `pending` and start the next turn
/// the moment the current one settles.
pub struct Session {
    id: String,
    context: SessionContext,
    input: mpsc::Receiver<SessionInput>,
    outbound: mpsc::Sender<OutboundFrame>,
    aggregator: UtteranceAggregator,
    pending: Option<String>,
    processing: bool,
    cancellation: CancellationToken,
    turn: Option<JoinHandle<TurnOutcome>>,
}

impl Session {
    pub fn new(
        id: String,
        context: SessionContext,
        input: mpsc::Receiver<SessionInput>,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Self {
        Self {
            id,
            context,
            input,
            outbound,
            aggregator: UtteranceAggregator::new(),
            pending: None,
            processing: false,
            cancellation: CancellationToken::new(),
            turn: None,
        }
    }

    /// Drive the session until the client disconnects or ends it.
    pub async fn run(mut self) {
        self.context.memory.create_session(&self.id).await;
        self.context.metrics.create_session(&self.id).await;

        let stream = match self.context.recognizer.open_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                error!(session_id = %self.id, error = %e, "Recognition stream failed to open");
                self.send(ServerEvent::Error {
                    message: "Failed to initialize voice agent. Please try again.".to_string(),
                })
                .await;
                self.teardown(None).await;
                return;
            }
        };
        let SttStream { mut events, handle } = stream;
        let mut stt_open = true;

        loop {
            tokio::select! {
                input = self.input.recv() => match input {
                    Some(SessionInput::Audio(audio)) => {
                        if stt_open && !handle.send_audio(audio).await {
                            stt_open = false;
                        }
                    }
                    Some(SessionInput::Command(command)) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
                event = events.recv(), if stt_open => match event {
                    Some(event) => self.handle_stt_event(event).await,
                    None => stt_open = false,
                },
                outcome = turn_finished(&mut self.turn) => {
                    self.finish_turn(outcome).await;
                }
            }
        }

        self.teardown(Some(handle)).await;
    }

    async fn handle_stt_event(&mut self, event: SttEvent) {
        match event {
            SttEvent::Transcript {
                text,
                is_final,
                speech_final,
                confidence,
            } => {
                // Live speech over a playing response is a barge-in.
                if self.processing && !text.trim().is_empty() {
                    self.abort_turn().await;
                }
                self.send(ServerEvent::Transcript {
                    text: text.clone(),
                    is_final,
                })
                .await;
                if is_final {
                    debug!(session_id = %self.id, confidence, text = %text, "Final transcript");
                    self.aggregator.append_final(&text);
                    if speech_final {
                        self.complete_utterance().await;
                    }
                }
            }
            SttEvent::UtteranceEnd => {
                self.complete_utterance().await;
            }
            SttEvent::SpeechStarted => {
                debug!(session_id = %self.id, "Speech started");
            }
            SttEvent::Error(reason) => {
                error!(session_id = %self.id, error = %reason, "Recognition error");
                self.send(ServerEvent::Error {
                    message: "Speech recognition error. Reconnecting...".to_string(),
                })
                .await;
            }
            SttEvent::Closed => {
                self.send(ServerEvent::Error {
                    message: "Speech recognition failed. Please reconnect.".to_string(),
                })
                .await;
            }
        }
    }

    /// Handle an utterance-complete signal from recognition.
    ///
    /// Duplicate signals are no-ops: the first one drains the aggregator,
    /// the rest find it empty.
    async fn complete_utterance(&mut self) {
        let Some(utterance) = self.aggregator.take() else {
            return;
        };
        if self.processing {
            // Speech that completed during a turn waits for its cleanup.
            // A second completion concatenates rather than overwriting.
            self.pending = Some(match self.pending.take() {
                Some(prev) => format!("{prev} {utterance}"),
                None => utterance,
            });
            return;
        }
        self.start_turn(utterance).await;
    }

    async fn start_turn(&mut self, utterance: String) {
        self.processing = true;
        self.cancellation = CancellationToken::new();

        self.context.metrics.begin_turn(&self.id).await;
        self.context.metrics.mark(&self.id, Stage::SttComplete).await;

        let turn = run_turn(
            self.context.clone(),
            self.id.clone(),
            utterance,
            self.outbound.clone(),
            self.cancellation.clone(),
        );
        self.turn = Some(tokio::spawn(turn));
    }

    async fn finish_turn(&mut self, outcome: TurnOutcome) {
        match outcome {
            TurnOutcome::Completed => debug!(session_id = %self.id, "Turn completed"),
            TurnOutcome::Interrupted => info!(session_id = %self.id, "Turn interrupted"),
            TurnOutcome::Failed => warn!(session_id = %self.id, "Turn failed"),
        }
        self.processing = false;
        // Speech that completed during the turn starts the next one here,
        // so a barge-in utterance is never dropped.
        if let Some(utterance) = self.pending.take() {
            self.start_turn(utterance).await;
        }
    }

    /// Cancel the in-flight turn, once.
    async fn abort_turn(&mut self) {
        if !self.processing || self.cancellation.is_cancelled() {
            return;
        }
        info!(session_id = %self.id, "Cancelling in-flight response");
        self.cancellation.cancel();
        self.send(ServerEvent::AudioInterrupted).await;
    }

    /// Apply a control command. Returns false when the session should end.
    async fn handle_command(&mut self, command: ClientCommand) -> bool {
        match command {
            ClientCommand::End => {
                info!(session_id = %self.id, "Session ended by client");
                self.abort_turn().await;
                false
            }
            ClientCommand::Clear => {
                info!(session_id = %self.id, "Conversation history cleared");
                self.abort_turn().await;
                self.context.memory.clear(&self.id).await;
                true
            }
            ClientCommand::Interrupt => {
                self.abort_turn().await;
                true
            }
        }
    }

    /// Queue an event for the client. A failure means the writer is gone;
    /// the loop notices the closed input channel right after.
    async fn send(&self, event: ServerEvent) {
        let _ = self.outbound.send(OutboundFrame::Event(event)).await;
    }

    async fn teardown(&mut self, stt: Option<SttHandle>) {
        self.cancellation.cancel();
        if let Some(handle) = stt {
            handle.finish().await;
        }
        if let Some(turn) = self.turn.take() {
            if let Ok(outcome) = turn.await {
                debug!(session_id = %self.id, ?outcome, "In-flight turn settled during teardown");
            }
        }

        if let Some(stats) = self.context.metrics.remove_session(&self.id).await {
            if stats.turn_count > 0 {
                info!(
                    session_id = %self.id,
                    turns = stats.turn_count,
                    avg_end_to_end_ms = stats.avg_end_to_end_ms,
                    "Session latency summary"
                );
            }
        }
        self.context.memory.remove(&self.id).await;
        info!(session_id = %self.id, "Session cleaned up");
    }
}

/// Resolves when the in-flight turn completes; pends forever while idle.
///
/// Clearing the slot on completion keeps a settled handle from being
/// polled again on the next loop iteration.
async fn turn_finished(turn: &mut Option<JoinHandle<TurnOutcome>>) -> TurnOutcome {
    let Some(handle) = turn.as_mut() else {
        return std::future::pending().await;
    };
    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "Turn task panicked");
            TurnOutcome::Failed
        }
    };
    *turn = None;
    outcome
}
