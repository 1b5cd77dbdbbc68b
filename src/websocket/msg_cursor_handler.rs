use std::sync::Arc;

use crate::models::{CursorBroadcast, CursorUpdateMessage, ServerMessage};
use crate::rooms::presence::PresenceMeta;
use crate::ws::connection::{ConnectionHandle, ConnectionSession};
use crate::AppState;

/// Handle CursorUpdateMessage
///
/// Updates the connection's presence entry with the new selection and fans
/// it out to the rest of the room. A connection that never joined the
/// document has no entry to update, so this is a no-op for it.
pub async fn handle_cursor_update(
    cursor_msg: &CursorUpdateMessage,
    state: &Arc<AppState>,
    handle: &ConnectionHandle,
    session: &ConnectionSession,
) {
    let Some(document_id) = cursor_msg.document_id.as_ref() else { return };
    let Some(user) = session.user() else { return };
    let Some(existing) = state.presence.get(document_id, &handle.id).await else { return };

    state
        .presence
        .add(
            document_id,
            &handle.id,
            PresenceMeta {
                user_id: existing.user_id,
                display_name: existing.display_name,
                selection: cursor_msg.selection.clone(),
                is_typing: false,
            },
        )
        .await;

    state
        .rooms
        .broadcast_to_others(
            document_id,
            &handle.id,
            ServerMessage::CursorUpdate(CursorBroadcast {
                document_id: document_id.clone(),
                user: user.info(),
                selection: cursor_msg.selection.clone(),
            }),
        )
        .await;
}
