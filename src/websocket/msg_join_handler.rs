use std::sync::Arc;
use tracing::{info, warn};

use crate::clients::app_service_client;
use crate::models::{JoinMessage, PresenceUpdateMessage, ServerMessage};
use crate::rooms::presence::PresenceMeta;
use crate::services::auth_service;
use crate::ws::connection::{ConnectionHandle, ConnectionSession};
use crate::AppState;

/// Handle JoinMessage
///
/// Authenticates the connection, subscribes it to its personal notification
/// channel and the requested document room, sends the current snapshot back
/// to the joiner and rebroadcasts the room's presence list.
pub async fn handle_join(
    join_msg: &JoinMessage,
    state: &Arc<AppState>,
    handle: &ConnectionHandle,
    session: &mut ConnectionSession,
) {
    let (Some(token), Some(document_id)) = (join_msg.token.as_ref(), join_msg.document_id.as_ref()) else {
        handle.send(ServerMessage::error("join: token/documentId required"));
        return;
    };

    info!("Join received from connection {} for document {}", handle.id, document_id);

    let user = match auth_service::verify_socket_token(token).await {
        Ok(user) => user,
        Err(e) => {
            warn!("Authentication failed for connection {}: {}", handle.id, e);
            handle.send(ServerMessage::error("Authentication failed"));
            return;
        }
    };
    let user = session.set_user(user).clone();

    // Personal channel for out-of-band notification delivery; always joined,
    // independent of which document was requested.
    state.user_channels.join(&user.id, handle.clone()).await;

    if let Some(workspace_id) = join_msg.workspace_id.as_ref() {
        // Only the first join per workspace counts as an active user.
        if session.register_workspace(workspace_id) {
            app_service_client::spawn_adjust_active_users(workspace_id, 1);
        }
        app_service_client::spawn_record_activity(
            "join",
            workspace_id,
            Some(user.id.clone()),
            Some(document_id.clone()),
        );
    }

    state.rooms.add_connection(document_id, handle.clone()).await;
    state
        .presence
        .add(document_id, &handle.id, PresenceMeta::viewer(&user.id, &user.name))
        .await;

    let init = state.rooms.init_from_store(document_id).await;
    handle.send(ServerMessage::Init(init));

    let entries = state.presence.list(document_id).await;
    state
        .rooms
        .broadcast_to_all(
            document_id,
            ServerMessage::PresenceUpdate(PresenceUpdateMessage {
                document_id: document_id.clone(),
                entries,
            }),
        )
        .await;
}
