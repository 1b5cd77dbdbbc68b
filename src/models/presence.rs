use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity attached to broadcasts originating from a connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Identity broadcast with typing events. Carries the connection id so
/// clients can distinguish two sessions of the same user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingUser {
    pub id: String,
    pub name: String,
    pub connection_id: String,
}

/// One connection's live view state within a document.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub connection_id: String,
    pub user_id: String,
    pub display_name: String,
    pub selection: Option<Value>,
    pub is_typing: bool,
}
