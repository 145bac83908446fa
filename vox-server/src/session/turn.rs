//! One response turn: streaming the model reply and delivering it as
//! synthesized sentences.
//!
//! A turn runs as its own task so the session loop stays free to notice
//! barge-in. Cancellation is cooperative: the token is checked before every
//! network call and before every audio chunk, and every checkpoint that
//! observes it funnels through the same early exit.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use vox_common::Error;

use crate::message::{ServerEvent, AUDIO_CHUNK_BYTES};
use crate::metrics::Stage;
use crate::provider::{ChatMessage, ChatRole};
use crate::segment::SentenceSegmenter;

use super::{OutboundFrame, SessionContext};

/// Client-facing text when a turn fails outright.
pub(super) const TURN_FAILURE_MESSAGE: &str = "Sorry, something went wrong. Please try again.";

/// Spoken apology synthesized after a turn failure.
pub(super) const FALLBACK_UTTERANCE: &str =
    "I'm sorry, I had trouble processing that. Could you try again?";

/// How a response turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The full reply was generated and delivered.
    Completed,
    /// A barge-in or control command cancelled the reply partway.
    Interrupted,
    /// The model failed and the client got an apology instead.
    Failed,
}

/// Run one full response turn for a dispatched utterance.
pub(super) async fn run_turn(
    context: SessionContext,
    session_id: String,
    user_text: String,
    outbound: mpsc::Sender<OutboundFrame>,
    cancellation: CancellationToken,
) -> TurnOutcome {
    let outcome = respond(&context, &session_id, &user_text, &outbound, &cancellation).await;
    // Latency is recorded for every outcome, interrupted turns included.
    context.metrics.finalize_turn(&session_id).await;
    outcome
}

async fn respond(
    context: &SessionContext,
    session_id: &str,
    user_text: &str,
    outbound: &mpsc::Sender<OutboundFrame>,
    cancellation: &CancellationToken,
) -> TurnOutcome {
    info!(session_id = %session_id, text = %user_text, "User utterance");

    // The utterance is persisted before anything fallible happens, so it
    // survives no matter how the turn ends.
    context
        .memory
        .add_message(session_id, ChatRole::User, user_text)
        .await;
    context.memory.compact(session_id).await;

    if cancellation.is_cancelled() {
        info!(session_id = %session_id, "Turn cancelled before the model call");
        return TurnOutcome::Interrupted;
    }

    let history = context.memory.history(session_id).await;

    match stream_reply(context, session_id, &history, outbound, cancellation).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Turn failed");
            apologize(context, outbound).await;
            TurnOutcome::Failed
        }
    }
}

/// Stream the model reply, synthesizing and delivering each sentence as it
/// completes.
///
/// Returns `Err` only for model failures, which warrant an apology. A lost
/// client or an observed cancellation resolves to an outcome directly.
async fn stream_reply(
    context: &SessionContext,
    session_id: &str,
    history: &[ChatMessage],
    outbound: &mpsc::Sender<OutboundFrame>,
    cancellation: &CancellationToken,
) -> Result<TurnOutcome, Error> {
    if !send_event(outbound, ServerEvent::Thinking).await {
        return Ok(TurnOutcome::Interrupted);
    }
    // Streamed turns do not know the total audio size up front.
    if !send_event(outbound, audio_start(context, None)).await {
        return Ok(TurnOutcome::Interrupted);
    }

    let mut stream = context
        .model
        .stream(history)
        .await
        .map_err(|e| Error::Model(e.to_string()))?;

    let mut segmenter = SentenceSegmenter::new();
    let mut response = String::new();
    let mut first_token = true;
    let mut first_sentence = true;

    loop {
        let token = tokio::select! {
            _ = cancellation.cancelled() => {
                return Ok(abort_reply(context, session_id, &response, outbound).await);
            }
            token = stream.recv() => token,
        };
        let Some(token) = token else { break };
        let token = token.map_err(|e| Error::Model(e.to_string()))?;

        if first_token {
            first_token = false;
            context.metrics.mark(session_id, Stage::FirstToken).await;
        }
        response.push_str(&token);

        for sentence in segmenter.push(&token) {
            if cancellation.is_cancelled() {
                return Ok(abort_reply(context, session_id, &response, outbound).await);
            }
            if first_sentence {
                first_sentence = false;
                if !send_event(outbound, ServerEvent::Speaking).await {
                    return Ok(TurnOutcome::Interrupted);
                }
            }
            if !speak_sentence(context, session_id, &sentence, outbound, cancellation).await {
                debug!(session_id = %session_id, "Client gone mid-reply");
                return Ok(TurnOutcome::Interrupted);
            }
        }
    }

    context.metrics.mark(session_id, Stage::LlmComplete).await;

    if let Some(tail) = segmenter.finish() {
        if cancellation.is_cancelled() {
            return Ok(abort_reply(context, session_id, &response, outbound).await);
        }
        if first_sentence && !send_event(outbound, ServerEvent::Speaking).await {
            return Ok(TurnOutcome::Interrupted);
        }
        if !speak_sentence(context, session_id, &tail, outbound, cancellation).await {
            debug!(session_id = %session_id, "Client gone mid-reply");
            return Ok(TurnOutcome::Interrupted);
        }
    }

    context.metrics.mark(session_id, Stage::LastAudio).await;
    let _ = send_event(outbound, ServerEvent::AudioEnd).await;

    let reply = response.trim();
    if !reply.is_empty() {
        context
            .memory
            .add_message(session_id, ChatRole::Assistant, reply)
            .await;
        let _ = send_event(
            outbound,
            ServerEvent::Response {
                text: reply.to_string(),
            },
        )
        .await;
        let messages = context.memory.message_count(session_id).await;
        info!(
            session_id = %session_id,
            text = %reply,
            messages,
            "Assistant reply"
        );
    }

    Ok(TurnOutcome::Completed)
}

/// Close out a turn that observed a cancellation.
///
/// Every checkpoint funnels here so an interrupted turn always looks the
/// same: the partial reply is kept with an interruption marker and the
/// audio framing is closed.
async fn abort_reply(
    context: &SessionContext,
    session_id: &str,
    partial: &str,
    outbound: &mpsc::Sender<OutboundFrame>,
) -> TurnOutcome {
    info!(session_id = %session_id, "Reply interrupted mid-stream");

    // Keep what was already said so the conversation stays coherent after
    // a barge-in.
    let partial = partial.trim_end();
    if !partial.is_empty() {
        let text = format!("{partial} [interrupted]");
        context
            .memory
            .add_message(session_id, ChatRole::Assistant, &text)
            .await;
    }

    let _ = send_event(outbound, ServerEvent::AudioEnd).await;

    TurnOutcome::Interrupted
}

/// Synthesize one sentence and deliver it in fixed-size chunks.
///
/// Returns false only when the client is gone. A synthesis failure skips
/// the sentence so one bad call does not end the whole turn.
async fn speak_sentence(
    context: &SessionContext,
    session_id: &str,
    sentence: &str,
    outbound: &mpsc::Sender<OutboundFrame>,
    cancellation: &CancellationToken,
) -> bool {
    let audio = match context.synthesizer.synthesize(sentence).await {
        Ok(audio) => audio,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Sentence synthesis failed, skipping");
            return true;
        }
    };

    // Output of a synthesis call that raced a cancellation is dropped, not
    // sent.
    if audio.is_empty() || cancellation.is_cancelled() {
        return true;
    }

    context.metrics.mark(session_id, Stage::FirstAudio).await;

    for chunk in audio.chunks(AUDIO_CHUNK_BYTES) {
        if cancellation.is_cancelled() {
            return true;
        }
        if outbound
            .send(OutboundFrame::Audio(chunk.to_vec()))
            .await
            .is_err()
        {
            return false;
        }
    }

    true
}

/// Tell the client the turn failed, then speak a short apology.
///
/// The broken stream's framing is closed first so the client can reset its
/// player. The apology is synthesized in one shot, the one case where the
/// total audio size is known before the framing event.
async fn apologize(context: &SessionContext, outbound: &mpsc::Sender<OutboundFrame>) {
    let _ = send_event(
        outbound,
        ServerEvent::Error {
            message: TURN_FAILURE_MESSAGE.to_string(),
        },
    )
    .await;
    let _ = send_event(outbound, ServerEvent::AudioEnd).await;

    match context.synthesizer.synthesize(FALLBACK_UTTERANCE).await {
        Ok(audio) if !audio.is_empty() => {
            let framing = audio_start(context, Some(audio.len() as u64));
            if !send_event(outbound, framing).await {
                return;
            }
            for chunk in audio.chunks(AUDIO_CHUNK_BYTES) {
                if outbound
                    .send(OutboundFrame::Audio(chunk.to_vec()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = send_event(outbound, ServerEvent::AudioEnd).await;
        }
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, "Fallback synthesis failed");
        }
    }
}

/// Audio framing event for the configured output format.
fn audio_start(context: &SessionContext, total_bytes: Option<u64>) -> ServerEvent {
    ServerEvent::AudioStart {
        sample_rate: context.speech.output_sample_rate,
        encoding: context.speech.output_encoding.clone(),
        total_bytes,
    }
}

/// Queue an event for the client. Returns false when the writer is gone.
async fn send_event(outbound: &mpsc::Sender<OutboundFrame>, event: ServerEvent) -> bool {
    outbound.send(OutboundFrame::Event(event)).await.is_ok()
}
