//! HTTP surface: health probes and the voice WebSocket.

use anyhow::Context;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use vox_common::VoxConfig;

use crate::memory::ConversationMemory;
use crate::metrics::LatencyTracker;
use crate::persona;
use crate::provider::create_model;
use crate::session::SessionContext;
use crate::stt::create_recognizer;
use crate::tts::create_synthesizer;
use crate::ws::websocket_route;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct VoxState {
    pub context: SessionContext,
}

impl std::fmt::Debug for VoxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoxState").finish_non_exhaustive()
    }
}

/// Build the service router.
pub fn build_router(state: VoxState) -> Router {
    Router::new()
        // ============ Health ============
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        // ============ Voice ============
        .route("/ws", get(websocket_route))
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "vox-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn readiness(State(state): State<VoxState>) -> Json<serde_json::Value> {
    let active_sessions = state.context.memory.active_sessions().await.len();
    Json(json!({
        "status": "ready",
        "active_sessions": active_sessions,
    }))
}

/// Assemble shared state from configuration.
///
/// Fails when a required API key is missing, so startup stops before the
/// first connection would.
pub fn build_state(config: &VoxConfig) -> anyhow::Result<VoxState> {
    let deepgram_key = config
        .secrets
        .deepgram
        .as_deref()
        .context("DEEPGRAM_API_KEY is not set")?;
    let llm_key = config.llm_api_key().with_context(|| {
        format!(
            "No API key configured for LLM provider '{}'",
            config.llm.provider
        )
    })?;

    let model = create_model(&config.llm, llm_key, &persona::system_prompt())?;
    let summarizer = config.memory.use_summarization.then(|| model.clone());
    let memory = Arc::new(ConversationMemory::new(config.memory.clone(), summarizer));

    let recognizer = create_recognizer(&config.speech, deepgram_key)?;
    let synthesizer = create_synthesizer(&config.speech, deepgram_key)?;

    Ok(VoxState {
        context: SessionContext {
            model,
            recognizer,
            synthesizer,
            memory,
            metrics: Arc::new(LatencyTracker::new()),
            speech: config.speech.clone(),
        },
    })
}
