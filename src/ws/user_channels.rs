use std::collections::HashMap;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::{NotificationMessage, ServerMessage};
use crate::ws::connection::ConnectionHandle;

/// Personal per-user delivery channels.
///
/// Every successful join subscribes the connection under its user id,
/// independent of which document was requested; notification delivery then
/// reaches whichever connections that user still has open.
pub struct UserChannelRegistry {
    channels: RwLock<HashMap<String, HashMap<String, ConnectionHandle>>>,
}

impl UserChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe a connection to its user's personal channel. Idempotent.
    pub async fn join(&self, user_id: &str, handle: ConnectionHandle) {
        let mut channels = self.channels.write().await;
        channels
            .entry(user_id.to_string())
            .or_default()
            .insert(handle.id.clone(), handle);
    }

    /// Drop a connection from a user's channel; the channel itself is removed
    /// once its last connection is gone.
    pub async fn leave(&self, user_id: &str, connection_id: &str) {
        let mut channels = self.channels.write().await;
        if let Some(conns) = channels.get_mut(user_id) {
            conns.remove(connection_id);
            if conns.is_empty() {
                channels.remove(user_id);
            }
        }
    }

    /// Attempt live delivery to every open connection of the recipient.
    /// Returns whether at least one connection received the notification.
    pub async fn deliver(&self, user_id: &str, notification: Value) -> bool {
        let channels = self.channels.read().await;
        match channels.get(user_id) {
            Some(conns) if !conns.is_empty() => {
                let msg = ServerMessage::Notification(NotificationMessage { notification });
                for handle in conns.values() {
                    handle.send(msg.clone());
                }
                true
            }
            _ => {
                debug!("No live connection for user {}, notification not delivered", user_id);
                false
            }
        }
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}
