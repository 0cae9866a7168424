use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::state::AppState;

const OUTBOUND_BUFFER: usize = 256;

/// Bus bridge: text frames from the client go to the request topic; responses
/// and every event topic are forwarded back.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    // One forwarder per outbound topic, fanned into a single writer
    let forwarders: Vec<_> = state
        .topics
        .outbound()
        .into_iter()
        .map(|topic| {
            let mut rx = state.bus.subscribe(&topic);
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(msg) => {
                            if out_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagging on {}; {} messages dropped", topic, skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        })
        .collect();
    drop(out_tx);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    info!("Bus bridge client connected");

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let delivered = state.bus.send_raw(&state.topics.requests, text);
                debug!("Bridged client command to {} subscribers", delivered);
            }
            Message::Close(_) => break,
            // Axum answers pings itself
            _ => {}
        }
    }

    for forwarder in forwarders {
        forwarder.abort();
    }
    send_task.abort();

    info!("Bus bridge client disconnected");
}
