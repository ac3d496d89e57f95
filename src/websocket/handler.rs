use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use uuid::Uuid;

use crate::{middleware::AuthUser, state::AppState};

/// WebSocket upgrade handler; the auth middleware has already resolved the user
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: Uuid, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (connection_id, mut rx) = state.rooms.join(user_id);

    // Forward room events to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match event.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("Failed to serialize {}: {:?}", event.name(), e);
                    continue;
                }
            };
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    // Clients only listen; inbound traffic is watched for the close frame
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Text(text) => {
                    tracing::debug!("Ignoring client frame from {}: {}", user_id, text);
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.rooms.leave(user_id, connection_id);

    tracing::info!("WebSocket connection closed for user {}", user_id);
}
