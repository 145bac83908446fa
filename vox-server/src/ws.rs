//! WebSocket transport for voice sessions.
//!
//! Each connection gets three tasks: the session loop, a writer that
//! drains the session's outbound queue onto the socket, and this reader
//! driving frames into the session. The reader owns the connection
//! lifecycle; when it stops, closing the input channel shuts the session
//! down and the writer follows once the queue drains.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::message::{ClientCommand, ServerEvent};
use crate::routes::VoxState;
use crate::session::{
    OutboundFrame, Session, SessionInput, INPUT_CHANNEL_CAPACITY, OUTBOUND_CHANNEL_CAPACITY,
};

/// Upgrade an HTTP request into a voice session socket.
pub async fn websocket_route(
    ws: WebSocketUpgrade,
    State(state): State<VoxState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: VoxState) {
    let session_id = Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // The ack goes out before the session spins up, so the client learns
    // its id even when initialization fails right after.
    let connected = ServerEvent::Connected {
        session_id: session_id.clone(),
    };
    if ws_tx.send(Message::Text(connected.to_json())).await.is_err() {
        return;
    }
    info!(session_id = %session_id, "Client connected");

    let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

    let session = Session::new(
        session_id.clone(),
        state.context.clone(),
        input_rx,
        outbound_tx,
    );
    let mut session_task = tokio::spawn(session.run());

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let message = match frame {
                OutboundFrame::Event(event) => Message::Text(event.to_json()),
                OutboundFrame::Audio(audio) => Message::Binary(audio),
            };
            if ws_tx.send(message).await.is_err() {
                return;
            }
        }
    });

    let mut session_done = false;
    loop {
        tokio::select! {
            message = ws_rx.next() => match message {
                Some(Ok(Message::Binary(audio))) => {
                    if input_tx.send(SessionInput::Audio(audio)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if let Some(command) = ClientCommand::parse(&text) {
                        if input_tx.send(SessionInput::Command(command)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Ping and pong are answered by the library.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(session_id = %session_id, error = %e, "Socket read failed");
                    break;
                }
            },
            _ = &mut session_task, if !session_done => {
                session_done = true;
                break;
            }
        }
    }

    // Closing the input channel is the shutdown signal; the session flushes
    // its queue and cleans up, then the writer drains what is left.
    drop(input_tx);
    if !session_done {
        let _ = session_task.await;
    }
    let _ = writer.await;
    info!(session_id = %session_id, "Client disconnected");
}
