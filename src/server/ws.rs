//! WebSocket plumbing: one reader loop and one writer task per
//! connection, with the protocol logic in [`SessionHandler`].

use std::sync::Arc;

use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::response::Response;
use futures::SinkExt;
use futures::StreamExt;
use tracing::debug;
use tracing::warn;

use crate::session::SessionHandler;
use crate::state::AppState;

pub async fn upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<AppState>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (handler, mut outbound) = SessionHandler::connect(state);

    // Writer task: serialize server frames onto the socket. Exits
    // when the session unregisters (channel closes) or the socket
    // breaks.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(error) => {
                    warn!(%error, "failed to serialize outbound frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => handler.handle_text(text.as_str()).await,
            Ok(Message::Close(_)) => break,
            // Pings are answered at the protocol layer.
            Ok(_) => {}
            Err(error) => {
                debug!(session_id = %handler.session_id(), %error, "socket error");
                break;
            }
        }
    }

    handler.disconnect();
    writer.abort();
}
