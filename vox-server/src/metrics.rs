//! Per-turn latency tracking for the voice pipeline.
//!
//! Each turn records monotonic timestamps as it moves through the stages
//! STT → first model token → model complete → first audio → last audio.
//! Finalizing a turn folds the millisecond deltas into per-session running
//! totals for average reporting. Recording is fire-and-forget: a missing
//! mark yields a `None` delta, never an error, and nothing here blocks
//! the pipeline.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::RwLock;

/// Pipeline stages marked during a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Utterance finalized by speech recognition.
    SttComplete,
    /// First streamed model token arrived.
    FirstToken,
    /// Model stream finished.
    LlmComplete,
    /// First synthesized audio chunk sent.
    FirstAudio,
    /// Most recent synthesized audio chunk sent.
    LastAudio,
}

#[derive(Debug, Clone, Copy)]
struct TurnMarks {
    start: Instant,
    stt: Option<Instant>,
    llm_first: Option<Instant>,
    llm_complete: Option<Instant>,
    tts_first: Option<Instant>,
    tts_last: Option<Instant>,
}

impl TurnMarks {
    fn new(start: Instant) -> Self {
        Self {
            start,
            stt: None,
            llm_first: None,
            llm_complete: None,
            tts_first: None,
            tts_last: None,
        }
    }
}

#[derive(Debug, Default)]
struct StageTotals {
    stt_ms: u64,
    llm_first_token_ms: u64,
    llm_complete_ms: u64,
    tts_first_chunk_ms: u64,
    end_to_end_ms: u64,
}

#[derive(Debug)]
struct SessionLatency {
    current: Option<TurnMarks>,
    turns: u64,
    totals: StageTotals,
}

impl SessionLatency {
    fn new() -> Self {
        Self {
            current: None,
            turns: 0,
            totals: StageTotals::default(),
        }
    }
}

/// Millisecond deltas for one finished turn.
///
/// Each delta is measured against the previous recorded stage, falling
/// back to turn start when an intermediate mark is missing.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TurnReport {
    pub stt_ms: Option<u64>,
    pub llm_first_token_ms: Option<u64>,
    pub llm_complete_ms: Option<u64>,
    pub tts_first_chunk_ms: Option<u64>,
    pub end_to_end_ms: Option<u64>,
}

/// Average latencies over every finalized turn of a session.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionStats {
    pub turn_count: u64,
    pub avg_stt_ms: u64,
    pub avg_llm_first_token_ms: u64,
    pub avg_llm_complete_ms: u64,
    pub avg_tts_first_chunk_ms: u64,
    pub avg_end_to_end_ms: u64,
}

/// Latency registry shared by every session, keyed by session id.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    inner: RwLock<HashMap<String, SessionLatency>>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Idempotent.
    pub async fn create_session(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        inner
            .entry(session_id.to_string())
            .or_insert_with(SessionLatency::new);
    }

    /// Drop a session's records, returning its final stats for logging.
    pub async fn remove_session(&self, session_id: &str) -> Option<SessionStats> {
        let mut inner = self.inner.write().await;
        let session = inner.remove(session_id)?;
        stats_of(&session)
    }

    /// Open a fresh turn record. Replaces any unfinalized previous turn.
    pub async fn begin_turn(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.get_mut(session_id) {
            session.current = Some(TurnMarks::new(Instant::now()));
            session.turns += 1;
        }
    }

    /// Record a stage timestamp for the in-flight turn.
    ///
    /// First-token and first-audio marks are set once; repeated marks are
    /// no-ops. Completion marks overwrite so the latest wins.
    pub async fn mark(&self, session_id: &str, stage: Stage) {
        self.mark_at(session_id, stage, Instant::now()).await;
    }

    pub(crate) async fn mark_at(&self, session_id: &str, stage: Stage, at: Instant) {
        let mut inner = self.inner.write().await;
        let Some(turn) = inner.get_mut(session_id).and_then(|s| s.current.as_mut()) else {
            return;
        };
        match stage {
            Stage::SttComplete => turn.stt = Some(at),
            Stage::FirstToken => {
                if turn.llm_first.is_none() {
                    turn.llm_first = Some(at);
                }
            }
            Stage::LlmComplete => turn.llm_complete = Some(at),
            Stage::FirstAudio => {
                if turn.tts_first.is_none() {
                    turn.tts_first = Some(at);
                }
            }
            Stage::LastAudio => turn.tts_last = Some(at),
        }
    }

    /// Close the in-flight turn, fold its deltas into the session totals,
    /// and log the turn summary. No-op when no turn is open.
    pub async fn finalize_turn(&self, session_id: &str) -> Option<TurnReport> {
        let mut inner = self.inner.write().await;
        let session = inner.get_mut(session_id)?;
        let turn = session.current.take()?;

        let ms = |mark: Option<Instant>, reference: Instant| -> Option<u64> {
            mark.map(|at| at.saturating_duration_since(reference).as_millis() as u64)
        };

        let start = turn.start;
        let report = TurnReport {
            stt_ms: ms(turn.stt, start),
            llm_first_token_ms: ms(turn.llm_first, turn.stt.unwrap_or(start)),
            llm_complete_ms: ms(turn.llm_complete, turn.stt.unwrap_or(start)),
            tts_first_chunk_ms: ms(turn.tts_first, turn.llm_complete.unwrap_or(start)),
            end_to_end_ms: ms(turn.tts_last, start),
        };

        let totals = &mut session.totals;
        if let Some(v) = report.stt_ms {
            totals.stt_ms += v;
        }
        if let Some(v) = report.llm_first_token_ms {
            totals.llm_first_token_ms += v;
        }
        if let Some(v) = report.llm_complete_ms {
            totals.llm_complete_ms += v;
        }
        if let Some(v) = report.tts_first_chunk_ms {
            totals.tts_first_chunk_ms += v;
        }
        if let Some(v) = report.end_to_end_ms {
            totals.end_to_end_ms += v;
        }

        tracing::info!(
            session_id = %session_id,
            stt_ms = ?report.stt_ms,
            llm_first_token_ms = ?report.llm_first_token_ms,
            llm_complete_ms = ?report.llm_complete_ms,
            tts_first_chunk_ms = ?report.tts_first_chunk_ms,
            end_to_end_ms = ?report.end_to_end_ms,
            "Turn latency"
        );

        Some(report)
    }

    /// Average latencies for a session, or `None` before its first turn.
    pub async fn session_stats(&self, session_id: &str) -> Option<SessionStats> {
        let inner = self.inner.read().await;
        stats_of(inner.get(session_id)?)
    }
}

fn stats_of(session: &SessionLatency) -> Option<SessionStats> {
    if session.turns == 0 {
        return None;
    }
    let n = session.turns;
    Some(SessionStats {
        turn_count: n,
        avg_stt_ms: session.totals.stt_ms / n,
        avg_llm_first_token_ms: session.totals.llm_first_token_ms / n,
        avg_llm_complete_ms: session.totals.llm_complete_ms / n,
        avg_tts_first_chunk_ms: session.totals.tts_first_chunk_ms / n,
        avg_end_to_end_ms: session.totals.end_to_end_ms / n,
    })
}
