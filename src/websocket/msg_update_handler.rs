use std::sync::Arc;
use tracing::debug;

use crate::clients::app_service_client;
use crate::models::{DocUpdateMessage, ServerMessage};
use crate::ws::connection::{ConnectionHandle, ConnectionSession};
use crate::AppState;

/// Handle DocUpdateMessage
///
/// Hands the edit to the room manager, which assigns a version, broadcasts
/// to the other members and schedules the debounced flush. The workspace
/// edit counter is bumped on the side and never blocks the edit itself.
pub async fn handle_doc_update(
    update_msg: &DocUpdateMessage,
    state: &Arc<AppState>,
    handle: &ConnectionHandle,
    session: &ConnectionSession,
) {
    let Some(user) = session.user() else {
        handle.send(ServerMessage::error("Not authenticated"));
        return;
    };
    let (Some(document_id), Some(edit)) = (update_msg.document_id.as_ref(), update_msg.edit.as_ref()) else {
        handle.send(ServerMessage::error("doc:update missing fields"));
        return;
    };

    let version = state
        .rooms
        .receive_edit(document_id, &handle.id, user.info(), edit.snapshot.clone())
        .await;
    debug!("Accepted edit v{} for document {} from connection {}", version, document_id, handle.id);

    if let Some(workspace_id) = session.resolve_workspace(update_msg.workspace_id.as_deref()) {
        app_service_client::spawn_record_edit(&workspace_id, &user.id, document_id);
    }
}
