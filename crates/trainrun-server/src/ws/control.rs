//! Control session WebSocket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::session::ControlSession;
use crate::state::AppState;

/// HTTP handler that upgrades the connection to a control session.
pub async fn control_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one control connection until the client goes away.
///
/// Outbound frames go through a channel drained by a sender task, so replies
/// and run events from background drain loops share one ordered writer.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = uuid::Uuid::new_v4().simple().to_string();
    info!(conn_id = %conn_id, "Control connection opened");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.to_string())).await.is_err() {
                debug!(conn_id = %sender_conn_id, "Control socket sink closed");
                break;
            }
        }
    });

    let mut session = ControlSession::new(Arc::clone(&state.runner), tx);
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => session.handle_text(&text).await,
            Ok(Message::Binary(bytes)) => {
                session.handle_text(&String::from_utf8_lossy(&bytes)).await
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                trace!(conn_id = %conn_id, "Ignoring ping/pong frame");
            }
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "Control socket receive error");
                break;
            }
        }
    }

    // Any run started here keeps going.
    session.teardown();
    drop(session);
    send_task.abort();
    info!(conn_id = %conn_id, "Control connection closed");
}
