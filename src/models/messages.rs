use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::models::presence::{PresenceEntry, TypingUser, UserInfo};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinMessage {
    pub token: Option<String>,
    pub document_id: Option<String>,
    pub workspace_id: Option<String>,
}

/// Edit payload carried by a `doc:update`. The client sends the full document
/// content in `snapshot`; an edit without a snapshot is accepted as a no-op
/// content change but still advances the room version.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EditPayload {
    pub snapshot: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DocUpdateMessage {
    pub document_id: Option<String>,
    pub edit: Option<EditPayload>,
    pub version: Option<i64>,
    pub workspace_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdateMessage {
    pub document_id: Option<String>,
    pub selection: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TypingMessage {
    pub document_id: Option<String>,
    #[serde(default)]
    pub is_typing: bool,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LeaveMessage {
    pub document_id: Option<String>,
    pub workspace_id: Option<String>,
}

/// Messages received from a client connection.
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "join")]
    Join(JoinMessage),
    #[serde(rename = "doc:update")]
    DocUpdate(DocUpdateMessage),
    #[serde(rename = "cursor:update")]
    CursorUpdate(CursorUpdateMessage),
    #[serde(rename = "typing")]
    Typing(TypingMessage),
    #[serde(rename = "leave")]
    Leave(LeaveMessage),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitMessage {
    pub document_id: String,
    pub snapshot: String,
    pub version: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DocUpdateBroadcast {
    pub document_id: String,
    pub content: Option<String>,
    pub user: UserInfo,
    pub version: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdateMessage {
    pub document_id: String,
    pub entries: Vec<PresenceEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CursorBroadcast {
    pub document_id: String,
    pub user: UserInfo,
    pub selection: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TypingBroadcast {
    pub document_id: String,
    pub user: TypingUser,
    pub is_typing: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub notification: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub message: String,
}

/// Messages sent to a client connection.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "init")]
    Init(InitMessage),
    #[serde(rename = "doc:update")]
    DocUpdate(DocUpdateBroadcast),
    #[serde(rename = "presence:update")]
    PresenceUpdate(PresenceUpdateMessage),
    #[serde(rename = "cursor:update")]
    CursorUpdate(CursorBroadcast),
    #[serde(rename = "presence:typing")]
    Typing(TypingBroadcast),
    #[serde(rename = "notification")]
    Notification(NotificationMessage),
    #[serde(rename = "error")]
    Error(ErrorMessage),
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorMessage { message: message.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_join_message() {
        let raw = r#"{"type":"join","token":"t0k3n","documentId":"doc1","workspaceId":"ws1"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Join(join) => {
                assert_eq!(join.token.as_deref(), Some("t0k3n"));
                assert_eq!(join.document_id.as_deref(), Some("doc1"));
                assert_eq!(join.workspace_id.as_deref(), Some("ws1"));
            }
            other => panic!("expected join, got {:?}", other),
        }
    }

    #[test]
    fn parses_doc_update_without_snapshot() {
        let raw = r#"{"type":"doc:update","documentId":"doc1","edit":{}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::DocUpdate(update) => {
                assert_eq!(update.document_id.as_deref(), Some("doc1"));
                assert!(update.edit.unwrap().snapshot.is_none());
            }
            other => panic!("expected doc:update, got {:?}", other),
        }
    }

    #[test]
    fn typing_flag_defaults_to_false() {
        let raw = r#"{"type":"typing","documentId":"doc1"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Typing(typing) => assert!(!typing.is_typing),
            other => panic!("expected typing, got {:?}", other),
        }
    }

    #[test]
    fn server_message_tags_match_protocol() {
        let msg = ServerMessage::Typing(TypingBroadcast {
            document_id: "doc1".to_string(),
            user: TypingUser {
                id: "u1".to_string(),
                name: "Ada".to_string(),
                connection_id: "c1".to_string(),
            },
            is_typing: true,
        });
        let raw = serde_json::to_string(&msg).unwrap();
        assert!(raw.contains(r#""type":"presence:typing""#));

        let err = serde_json::to_string(&ServerMessage::error("join failed")).unwrap();
        assert!(err.contains(r#""type":"error""#));
    }

    #[test]
    fn rejects_unknown_event_type() {
        let raw = r#"{"type":"doc:merge","documentId":"doc1"}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }
}
