use std::sync::Arc;
use axum::{
    extract::{ws::{Message, WebSocket, WebSocketUpgrade}, State},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info};

use crate::clients::app_service_client;
use crate::models::{ClientMessage, PresenceUpdateMessage, ServerMessage};
use crate::websocket::msg_cursor_handler::handle_cursor_update;
use crate::websocket::msg_join_handler::handle_join;
use crate::websocket::msg_leave_handler::handle_leave;
use crate::websocket::msg_typing_handler::handle_typing;
use crate::websocket::msg_update_handler::handle_doc_update;
use crate::ws::connection::{ConnectionHandle, ConnectionSession};
use crate::AppState;

/// WebSocket handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    app_state: State<Arc<AppState>>,
) -> Response {
    info!("New WebSocket connection attempt");
    ws.on_upgrade(move |socket| handle_socket(socket, app_state.0))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (handle, mut outbound) = ConnectionHandle::new();
    let connection_id = handle.id.clone();
    info!("WebSocket connection established with connection_id: {}", connection_id);

    // Split the socket into sender and receiver
    let (mut sender, mut receiver) = socket.split();

    // Writer task: drain queued server messages into the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize outbound message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut session = ConnectionSession::new();

    // Read loop: parse incoming frames and dispatch per message type. A
    // malformed frame gets an error back and never takes the connection down.
    while let Some(frame) = receiver.next().await {
        let raw = match frame {
            Ok(Message::Text(raw)) => raw,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket error on connection {}: {}", connection_id, e);
                break;
            }
        };

        let json_msg: ClientMessage = match serde_json::from_str(&raw) {
            Ok(json_msg) => {
                debug!("Received message from {}: {:?}", connection_id, json_msg);
                json_msg
            }
            Err(e) => {
                error!("Failed to parse message from {}: {}", connection_id, e);
                handle.send(ServerMessage::error("invalid message"));
                continue;
            }
        };

        match json_msg {
            ClientMessage::Join(msg) => handle_join(&msg, &state, &handle, &mut session).await,
            ClientMessage::DocUpdate(msg) => handle_doc_update(&msg, &state, &handle, &session).await,
            ClientMessage::CursorUpdate(msg) => handle_cursor_update(&msg, &state, &handle, &session).await,
            ClientMessage::Typing(msg) => handle_typing(&msg, &state, &handle, &session).await,
            ClientMessage::Leave(msg) => handle_leave(&msg, &state, &handle, &mut session).await,
        }
    }

    handle_disconnect(&state, &handle, &mut session).await;
    send_task.abort();
    info!("WebSocket connection terminated: {}", connection_id);
}

/// Cleanup when the socket goes away, with or without a prior explicit
/// leave. Rooms are derived from actual membership rather than a separately
/// tracked list, and workspace decrements go through the same tracking set
/// as `leave`, so nothing here can double-clean.
async fn handle_disconnect(
    state: &Arc<AppState>,
    handle: &ConnectionHandle,
    session: &mut ConnectionSession,
) {
    for document_id in state.rooms.rooms_for_connection(&handle.id).await {
        state.presence.remove(&document_id, &handle.id).await;
        let entries = state.presence.list(&document_id).await;
        state
            .rooms
            .broadcast_to_others(
                &document_id,
                &handle.id,
                ServerMessage::PresenceUpdate(PresenceUpdateMessage {
                    document_id: document_id.clone(),
                    entries,
                }),
            )
            .await;
        state.rooms.remove_connection(&document_id, &handle.id).await;
    }

    let user_id = session.user().map(|u| u.id.clone());
    if let Some(user_id) = &user_id {
        state.user_channels.leave(user_id, &handle.id).await;
    }

    for workspace_id in session.drain_workspaces() {
        app_service_client::spawn_adjust_active_users(&workspace_id, -1);
        app_service_client::spawn_record_activity("disconnect", &workspace_id, user_id.clone(), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::db::docstore::testing::MemoryDocumentStore;
    use crate::rooms::manager::RoomManager;
    use crate::rooms::presence::{PresenceMeta, PresenceRegistry};
    use crate::ws::connection::AuthenticatedUser;
    use crate::ws::user_channels::UserChannelRegistry;

    fn test_state(store: Arc<MemoryDocumentStore>) -> Arc<AppState> {
        Arc::new(AppState {
            rooms: Arc::new(RoomManager::new(store, Duration::from_millis(40))),
            presence: Arc::new(PresenceRegistry::new()),
            user_channels: Arc::new(UserChannelRegistry::new()),
        })
    }

    fn ada() -> AuthenticatedUser {
        AuthenticatedUser {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            roles: vec![],
        }
    }

    #[tokio::test]
    async fn disconnect_cleans_every_joined_room() {
        let store = Arc::new(MemoryDocumentStore::new());
        let state = test_state(store.clone());
        let (a, _rx_a) = ConnectionHandle::new();
        let (b, mut rx_b) = ConnectionHandle::new();

        // a is in doc1 (with b) and alone in doc2; it never sent leave.
        state.rooms.add_connection("doc1", a.clone()).await;
        state.rooms.add_connection("doc1", b.clone()).await;
        state.rooms.add_connection("doc2", a.clone()).await;
        state.presence.add("doc1", &a.id, PresenceMeta::viewer("u1", "Ada")).await;
        state.presence.add("doc1", &b.id, PresenceMeta::viewer("u2", "Grace")).await;
        state.presence.add("doc2", &a.id, PresenceMeta::viewer("u1", "Ada")).await;
        state.user_channels.join("u1", a.clone()).await;

        let mut session = ConnectionSession::new();
        session.set_user(ada());
        session.register_workspace("ws1");
        state.rooms.receive_edit("doc2", &a.id, ada().info(), Some("unsaved".into())).await;

        handle_disconnect(&state, &a, &mut session).await;

        // doc2 was a's only room: flushed and evicted.
        assert_eq!(state.rooms.room_count().await, 1);
        assert_eq!(store.saves(), vec![("doc2".to_string(), "unsaved".to_string())]);
        assert!(state.presence.list("doc2").await.is_empty());

        // doc1 keeps b, which saw the presence update.
        let entries = state.presence.list("doc1").await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].connection_id, b.id);
        match rx_b.try_recv() {
            Ok(ServerMessage::PresenceUpdate(update)) => {
                assert_eq!(update.document_id, "doc1");
                assert_eq!(update.entries.len(), 1);
            }
            other => panic!("expected presence update for b, got {:?}", other),
        }

        // Personal channel is gone and workspaces are drained.
        assert!(!state.user_channels.deliver("u1", serde_json::json!({})).await);
        assert!(session.drain_workspaces().is_empty());
    }

    #[tokio::test]
    async fn disconnect_after_leave_is_idempotent() {
        let store = Arc::new(MemoryDocumentStore::new());
        let state = test_state(store);
        let (a, _rx_a) = ConnectionHandle::new();

        let mut session = ConnectionSession::new();
        session.set_user(ada());
        session.register_workspace("ws1");

        // Explicit leave already released the workspace and the room.
        assert!(session.release_workspace("ws1"));

        handle_disconnect(&state, &a, &mut session).await;
        assert_eq!(state.rooms.room_count().await, 0);
        assert!(session.drain_workspaces().is_empty());
    }
}
