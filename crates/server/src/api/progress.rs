//! # Progress Socket
//!
//! `GET /ws/:chat_session_id` registers a websocket observer for one session
//! and relays every progress event of that session's runs as a JSON text
//! message. Events are best effort; a slow socket loses some.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;

use opex_core::agent::ObserverRegistry;

use crate::AppState;

pub fn progress_routes() -> Router<AppState> {
    Router::new().route("/ws/:chat_session_id", get(progress_socket))
}

async fn progress_socket(
    ws: WebSocketUpgrade,
    Path(chat_session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let observers = state.observers.clone();
    ws.on_upgrade(move |socket| observe(socket, observers, chat_session_id))
}

async fn observe(socket: WebSocket, observers: Arc<ObserverRegistry>, session_id: String) {
    let (id, mut events) = observers.register(&session_id);
    let (mut sender, mut receiver) = socket.split();
    tracing::debug!(session_id = %session_id, observer = id, "observer connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode progress event");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Observers have nothing to say
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    observers.unregister(&session_id, id);
    tracing::debug!(session_id = %session_id, observer = id, "observer disconnected");
}
