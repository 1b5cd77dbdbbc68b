use std::sync::Arc;
use tracing::info;

use crate::clients::app_service_client;
use crate::models::{LeaveMessage, PresenceUpdateMessage, ServerMessage};
use crate::ws::connection::{ConnectionHandle, ConnectionSession};
use crate::AppState;

/// Handle LeaveMessage
///
/// Removes presence, tells the remaining room members, and drops room
/// membership — which flushes and evicts the room if this was the last
/// connection. The workspace active-user count is decremented only if this
/// connection had registered an increment for it; a double leave is a no-op.
pub async fn handle_leave(
    leave_msg: &LeaveMessage,
    state: &Arc<AppState>,
    handle: &ConnectionHandle,
    session: &mut ConnectionSession,
) {
    let Some(document_id) = leave_msg.document_id.as_ref() else { return };
    info!("Leave received from connection {} for document {}", handle.id, document_id);

    state.presence.remove(document_id, &handle.id).await;
    let entries = state.presence.list(document_id).await;
    state
        .rooms
        .broadcast_to_others(
            document_id,
            &handle.id,
            ServerMessage::PresenceUpdate(PresenceUpdateMessage {
                document_id: document_id.clone(),
                entries,
            }),
        )
        .await;
    state.rooms.remove_connection(document_id, &handle.id).await;

    if let Some(workspace_id) = session.resolve_workspace(leave_msg.workspace_id.as_deref()) {
        if session.release_workspace(&workspace_id) {
            app_service_client::spawn_adjust_active_users(&workspace_id, -1);
        }
        app_service_client::spawn_record_activity(
            "leave",
            &workspace_id,
            session.user().map(|u| u.id.clone()),
            Some(document_id.clone()),
        );
    }
}
