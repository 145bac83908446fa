//! vox-server service entry point.

use anyhow::Result;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use vox_common::config::VoxConfig;
use vox_common::logging::init_logging;
use vox_server::{build_router, build_state};

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    let config = VoxConfig::load_with_env()?;
    init_logging(&config.logging.level, &config.logging.format);

    tracing::info!("Vox Server v{}", env!("CARGO_PKG_VERSION"));

    let state = build_state(&config)?;

    // Browser clients connect from arbitrary origins during development.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = build_router(state).layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    print_banner(&config, addr);

    #[cfg(unix)]
    let shutdown = {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
                _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
            }
        }
    };
    #[cfg(not(unix))]
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
    };

    tracing::info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn print_banner(config: &VoxConfig, addr: SocketAddr) {
    let memory_mode = if config.memory.use_summarization {
        "summarizing"
    } else {
        "sliding window"
    };

    println!("🎙️  Vox voice server started");
    println!("   WebSocket: ws://{addr}/ws");
    println!(
        "   LLM:       {} ({})",
        config.llm.provider,
        config.llm.effective_model()
    );
    println!(
        "   STT:       {} ({})",
        config.speech.stt_provider, config.speech.stt_model
    );
    println!(
        "   TTS:       {} ({})",
        config.speech.tts_provider, config.speech.tts_voice
    );
    println!(
        "   Memory:    {memory_mode} ({} messages)",
        config.memory.max_messages
    );
    println!("   Press Ctrl+C to stop");
}
