use std::sync::Arc;

use crate::models::{ServerMessage, TypingBroadcast, TypingMessage};
use crate::models::presence::TypingUser;
use crate::rooms::presence::PresenceMeta;
use crate::ws::connection::{ConnectionHandle, ConnectionSession};
use crate::AppState;

/// Handle TypingMessage
///
/// Identity fields are optional on the wire; missing ones fall back to the
/// connection's own recorded identity. Without either there is nobody to
/// attribute the typing state to and the event is dropped.
pub async fn handle_typing(
    typing_msg: &TypingMessage,
    state: &Arc<AppState>,
    handle: &ConnectionHandle,
    session: &ConnectionSession,
) {
    let Some(document_id) = typing_msg.document_id.as_ref() else { return };

    let user = session.user();
    let Some(id) = typing_msg.user_id.clone().or_else(|| user.map(|u| u.id.clone())) else {
        return;
    };
    let name = typing_msg
        .display_name
        .clone()
        .or_else(|| user.map(|u| u.name.clone()))
        .unwrap_or_else(|| id.clone());

    let typing_user = TypingUser {
        id,
        name,
        connection_id: handle.id.clone(),
    };

    state
        .presence
        .add(
            document_id,
            &handle.id,
            PresenceMeta {
                user_id: typing_user.id.clone(),
                display_name: typing_user.name.clone(),
                selection: None,
                is_typing: typing_msg.is_typing,
            },
        )
        .await;

    state
        .rooms
        .broadcast_to_others(
            document_id,
            &handle.id,
            ServerMessage::Typing(TypingBroadcast {
                document_id: document_id.clone(),
                user: typing_user,
                is_typing: typing_msg.is_typing,
            }),
        )
        .await;
}
