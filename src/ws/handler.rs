//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::{ArenaHandle, Player, PlayerInput};
use crate::util::rate_limit::PlayerRateLimiter;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let uid = state.next_uid();
    debug!(uid, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, uid, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, uid: u32, state: AppState) {
    info!(uid, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (player, outbound_rx) = Player::new(uid, state.config.outbound_queue_capacity);

    if let Err(e) = state.arena.connect(player).await {
        error!(uid, error = %e, "Failed to join arena");
        return;
    }

    let rate_limiter = PlayerRateLimiter::new(state.config.input_rate_limit);
    run_session(uid, ws_sink, ws_stream, outbound_rx, &state.arena, rate_limiter).await;

    info!(uid, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    uid: u32,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    arena: &ArenaHandle,
    rate_limiter: PlayerRateLimiter,
) {
    // Spawn writer task: outbound queue -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if let Err(e) = ws_sink.send(Message::Binary(payload.to_vec())).await {
                debug!(uid, error = %e, "WebSocket send failed");
                return;
            }
        }
        // Queue closed by the arena (disconnect or eviction)
        debug!(uid, "Outbound queue closed");
        let _ = ws_sink.send(Message::Close(None)).await;
    });

    // Reader loop: WebSocket -> arena
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Binary(data)) => {
                if !rate_limiter.check_input() {
                    warn!(uid, "Rate limited input message");
                    continue;
                }

                let input = PlayerInput {
                    uid,
                    data: Bytes::from(data),
                };
                if arena.send_input(input).await.is_err() {
                    debug!(uid, "Arena input channel closed");
                    break;
                }
            }
            Ok(Message::Text(_)) => {
                warn!(uid, "Received text message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(uid, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(uid, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(uid, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(uid, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Signal disconnect to the arena
    if let Err(e) = arena.disconnect(uid).await {
        debug!(uid, error = %e, "Arena gone before disconnect");
    }

    // Abort writer task
    writer_handle.abort();
}
