use std::collections::HashMap;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::models::PresenceEntry;

/// Display metadata for one connection in one document.
#[derive(Debug, Clone)]
pub struct PresenceMeta {
    pub user_id: String,
    pub display_name: String,
    pub selection: Option<Value>,
    pub is_typing: bool,
}

impl PresenceMeta {
    pub fn viewer(user_id: &str, display_name: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            selection: None,
            is_typing: false,
        }
    }
}

/// Tracks which connections are viewing which document, with live
/// cursor/typing metadata. Nothing here is persisted.
///
/// Buckets keep insertion order; consumers may only rely on presence or
/// absence of an entry, not on position.
pub struct PresenceRegistry {
    docs: RwLock<HashMap<String, Vec<PresenceEntry>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
        }
    }

    /// Upsert the presence entry for a connection in a document. The whole
    /// metadata record is replaced; an existing entry keeps its position.
    pub async fn add(&self, document_id: &str, connection_id: &str, meta: PresenceMeta) {
        let mut docs = self.docs.write().await;
        let bucket = docs.entry(document_id.to_string()).or_default();
        let entry = PresenceEntry {
            connection_id: connection_id.to_string(),
            user_id: meta.user_id,
            display_name: meta.display_name,
            selection: meta.selection,
            is_typing: meta.is_typing,
        };
        match bucket.iter_mut().find(|e| e.connection_id == connection_id) {
            Some(existing) => *existing = entry,
            None => bucket.push(entry),
        }
    }

    /// Remove a connection's entry; drops the whole document bucket when it
    /// empties. No-op if the entry was never there.
    pub async fn remove(&self, document_id: &str, connection_id: &str) {
        let mut docs = self.docs.write().await;
        if let Some(bucket) = docs.get_mut(document_id) {
            bucket.retain(|e| e.connection_id != connection_id);
            if bucket.is_empty() {
                docs.remove(document_id);
            }
        }
    }

    /// Snapshot of everyone currently present in a document.
    pub async fn list(&self, document_id: &str) -> Vec<PresenceEntry> {
        let docs = self.docs.read().await;
        docs.get(document_id).cloned().unwrap_or_default()
    }

    /// Current entry for one connection, if present.
    pub async fn get(&self, document_id: &str, connection_id: &str) -> Option<PresenceEntry> {
        let docs = self.docs.read().await;
        docs.get(document_id)
            .and_then(|bucket| bucket.iter().find(|e| e.connection_id == connection_id).cloned())
    }

    pub async fn stats(&self) -> (usize, usize) {
        let docs = self.docs.read().await;
        let entries = docs.values().map(|b| b.len()).sum();
        (docs.len(), entries)
    }
}
