use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::models::{ServerMessage, UserInfo};

/// Authenticated identity recorded on a connection at join time.
/// Immutable for the rest of the connection's lifetime.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: String,
    pub name: String,
    pub roles: Vec<String>,
}

impl AuthenticatedUser {
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            roles: self.roles.clone(),
        }
    }
}

/// Cheap, cloneable handle to a live connection: its id plus the outbound
/// message queue drained by the connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: String,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ConnectionHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Uuid::new_v4().to_string(),
            tx,
        };
        (handle, rx)
    }

    /// Queue a message for this connection. A closed queue means the writer
    /// task is gone and the connection is being torn down; nothing to do.
    pub fn send(&self, msg: ServerMessage) {
        if self.tx.send(msg).is_err() {
            debug!("Dropping message for closed connection {}", self.id);
        }
    }
}

/// Per-connection protocol state, owned by the socket's read loop.
pub struct ConnectionSession {
    user: Option<AuthenticatedUser>,
    joined_workspaces: HashSet<String>,
    default_workspace: Option<String>,
}

impl ConnectionSession {
    pub fn new() -> Self {
        Self {
            user: None,
            joined_workspaces: HashSet::new(),
            default_workspace: None,
        }
    }

    pub fn user(&self) -> Option<&AuthenticatedUser> {
        self.user.as_ref()
    }

    /// Record the authenticated identity and return the effective one. The
    /// first join wins; later joins on the same connection keep the original
    /// identity.
    pub fn set_user(&mut self, user: AuthenticatedUser) -> &AuthenticatedUser {
        self.user.get_or_insert(user)
    }

    /// Workspace id to charge an event against when the client did not send
    /// one: the last workspace this connection joined with.
    pub fn resolve_workspace(&self, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(|w| w.to_string())
            .or_else(|| self.default_workspace.clone())
    }

    /// Register an active-user increment for a workspace. Returns true only
    /// the first time per (connection, workspace), so duplicate joins cannot
    /// double-count.
    pub fn register_workspace(&mut self, workspace_id: &str) -> bool {
        self.default_workspace = Some(workspace_id.to_string());
        self.joined_workspaces.insert(workspace_id.to_string())
    }

    /// Release a previously registered workspace. Returns true if this
    /// connection actually held an increment for it; releasing an untracked
    /// workspace is a no-op.
    pub fn release_workspace(&mut self, workspace_id: &str) -> bool {
        self.joined_workspaces.remove(workspace_id)
    }

    /// Take every workspace still tracked by this connection, for disconnect
    /// cleanup. Leaves the set empty so cleanup is idempotent.
    pub fn drain_workspaces(&mut self) -> Vec<String> {
        self.joined_workspaces.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_registered_once_per_connection() {
        let mut session = ConnectionSession::new();
        assert!(session.register_workspace("ws1"));
        assert!(!session.register_workspace("ws1"));
        assert!(session.register_workspace("ws2"));
    }

    #[test]
    fn release_decrements_exactly_once() {
        let mut session = ConnectionSession::new();
        session.register_workspace("ws1");
        session.register_workspace("ws1");
        assert!(session.release_workspace("ws1"));
        assert!(!session.release_workspace("ws1"));
    }

    #[test]
    fn release_of_untracked_workspace_is_noop() {
        let mut session = ConnectionSession::new();
        assert!(!session.release_workspace("ws1"));
    }

    #[test]
    fn drain_empties_tracking_set() {
        let mut session = ConnectionSession::new();
        session.register_workspace("ws1");
        session.register_workspace("ws2");
        let mut drained = session.drain_workspaces();
        drained.sort();
        assert_eq!(drained, vec!["ws1".to_string(), "ws2".to_string()]);
        assert!(session.drain_workspaces().is_empty());
    }

    #[test]
    fn explicit_workspace_wins_over_default() {
        let mut session = ConnectionSession::new();
        session.register_workspace("ws1");
        assert_eq!(session.resolve_workspace(Some("ws2")).as_deref(), Some("ws2"));
        assert_eq!(session.resolve_workspace(None).as_deref(), Some("ws1"));
    }

    #[test]
    fn first_identity_sticks() {
        let mut session = ConnectionSession::new();
        session.set_user(AuthenticatedUser {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            roles: vec![],
        });
        session.set_user(AuthenticatedUser {
            id: "u2".to_string(),
            name: "Eve".to_string(),
            roles: vec![],
        });
        assert_eq!(session.user().unwrap().id, "u1");
    }
}
