//! WebSocket upgrade endpoint and per-connection socket loop.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use parley_protocol::{ClientFrame, ServerFrame};

use super::ConnectionId;
use crate::api::AppState;
use crate::session::SessionError;
use crate::store::StoreError;

/// Upgrade handler for `GET /api/ws`.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one WebSocket connection until it closes.
///
/// Malformed frames are logged and dropped; the socket stays open.
/// Closing the socket cancels nothing — sessions outlive connections.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (conn_id, mut frame_rx) = state.hub.register();
    info!(conn_id, "WebSocket connected");

    // Writer task: drain the hub's frame queue into the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode server frame"),
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_text(&text, conn_id, &state).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                // Binary/ping/pong frames are not part of the protocol.
            }
            Err(e) => {
                warn!(conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer.abort();
    state.hub.unregister(conn_id);
    info!(conn_id, "WebSocket closed");
}

/// Process one inbound text frame.
///
/// Malformed frames are a logged warning, never a close.
async fn handle_text(text: &str, conn_id: ConnectionId, state: &AppState) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => {
            // Referencing a conversation subscribes this connection to
            // its events.
            state.hub.watch(conn_id, frame.conversation_id());
            handle_frame(frame, conn_id, state).await;
        }
        Err(e) => {
            warn!(conn_id, error = %e, "dropping malformed frame");
        }
    }
}

async fn handle_frame(frame: ClientFrame, conn_id: ConnectionId, state: &AppState) {
    match frame {
        ClientFrame::StreamCreate {
            event_id,
            conversation_id,
            content,
            model,
        } => {
            let result = state
                .sessions
                .create(event_id.clone(), conversation_id, content, model)
                .await;
            match result {
                Ok(()) => {}
                Err(SessionError::Duplicate(_)) => {
                    warn!(conn_id, event_id, "rejected duplicate stream.create");
                }
                Err(e) => {
                    warn!(conn_id, event_id, error = %e, "stream.create failed");
                }
            }
        }
        ClientFrame::StreamCancel {
            event_id,
            conversation_id,
        } => {
            state.sessions.cancel(&event_id, &conversation_id);
        }
        ClientFrame::TitleUpdate {
            event_id,
            conversation_id,
            title,
        } => match state.store.rename_conversation(&conversation_id, &title).await {
            Ok(()) => {
                state
                    .hub
                    .broadcast(
                        &conversation_id,
                        ServerFrame::TitleUpdate {
                            event_id,
                            conversation_id: conversation_id.clone(),
                            title,
                        },
                    )
                    .await;
            }
            Err(StoreError::NotFound(_)) => {
                debug!(conn_id, conversation_id, "title update for unknown conversation");
            }
            Err(e) => {
                warn!(conn_id, conversation_id, error = %e, "title update failed");
            }
        },
    }
}
