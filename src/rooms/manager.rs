use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::db::docstore::DocumentStore;
use crate::models::{DocUpdateBroadcast, InitMessage, ServerMessage, UserInfo};
use crate::ws::connection::ConnectionHandle;

/// A buffered, not-yet-persisted edit. Each record carries the full content
/// snapshot the client sent; at flush time only the last record of a batch is
/// written out.
#[derive(Debug, Clone)]
pub struct EditRecord {
    pub origin_connection: String,
    pub user: UserInfo,
    pub content: Option<String>,
    pub version: i64,
}

/// Live state of one document's editing session.
struct Room {
    snapshot: String,
    version: i64,
    /// Whether this room's state is authoritative over storage. Set by the
    /// init-time storage read, or immediately when a room is born from an
    /// edit that raced ahead of its join.
    loaded: bool,
    pending: Vec<EditRecord>,
    members: HashMap<String, ConnectionHandle>,
    /// Handle of the pending debounced flush, owned by the room so that
    /// "is a flush scheduled" is a single field check.
    flush_timer: Option<JoinHandle<()>>,
}

impl Room {
    fn new(loaded: bool) -> Self {
        Self {
            snapshot: String::new(),
            version: 0,
            loaded,
            pending: Vec::new(),
            members: HashMap::new(),
            flush_timer: None,
        }
    }
}

/// The authoritative in-process view of every live document, and the single
/// choke point for merging edits and persisting them.
///
/// Merge policy is last-writer-wins full-snapshot replacement: every edit
/// replaces the whole document, and a flush writes only the newest buffered
/// edit. Two people typing simultaneously in the same region will lose the
/// slower writer's text. That trade-off is deliberate; replacing it with
/// operational transforms would be a different system.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<Mutex<Room>>>>,
    store: Arc<dyn DocumentStore>,
    flush_delay: Duration,
}

impl RoomManager {
    pub fn new(store: Arc<dyn DocumentStore>, flush_delay: Duration) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            store,
            flush_delay,
        }
    }

    async fn get_or_create(&self, document_id: &str, loaded_on_create: bool) -> Arc<Mutex<Room>> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(document_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring the write lock
        if let Some(room) = rooms.get(document_id) {
            return room.clone();
        }
        let room = Arc::new(Mutex::new(Room::new(loaded_on_create)));
        rooms.insert(document_id.to_string(), room.clone());
        room
    }

    /// State to hand a newly joined client.
    ///
    /// The first initialization of a room reads the document store; once a
    /// room holds loaded state, its in-memory view is authoritative and
    /// storage is not consulted again for its lifetime. A failed read logs
    /// and surfaces an empty snapshot so a broken store cannot block
    /// collaboration from starting; the next join retries the read.
    pub async fn init_from_store(&self, document_id: &str) -> InitMessage {
        let room = self.get_or_create(document_id, false).await;
        let mut room = room.lock().await;

        if !room.loaded {
            match self.store.load_document(document_id).await {
                Ok(Some(doc)) => {
                    room.snapshot = doc.content;
                    room.version = doc.version_hint.unwrap_or(1);
                    room.loaded = true;
                }
                Ok(None) => {
                    room.loaded = true;
                }
                Err(e) => {
                    error!("Failed to load document {}: {}", document_id, e);
                }
            }
        }

        InitMessage {
            document_id: document_id.to_string(),
            snapshot: room.snapshot.clone(),
            version: room.version,
        }
    }

    /// Register a connection as a member of the room, creating the room if
    /// needed (an edit or join can arrive for a document nobody holds yet).
    pub async fn add_connection(&self, document_id: &str, handle: ConnectionHandle) {
        let room = self.get_or_create(document_id, false).await;
        let mut room = room.lock().await;
        room.members.insert(handle.id.clone(), handle);
    }

    /// Remove a connection from the room. When the last member leaves, the
    /// room is flushed once and evicted; eviction happens regardless of the
    /// flush outcome, so a failed final write can leave durable storage
    /// behind the last accepted edit.
    pub async fn remove_connection(&self, document_id: &str, connection_id: &str) {
        let evicted = {
            let mut rooms = self.rooms.write().await;
            let Some(room_arc) = rooms.get(document_id).cloned() else {
                return;
            };
            let mut room = room_arc.lock().await;
            room.members.remove(connection_id);
            if !room.members.is_empty() {
                return;
            }
            if let Some(timer) = room.flush_timer.take() {
                timer.abort();
            }
            rooms.remove(document_id);
            info!("Evicting idle room {}", document_id);
            drop(room);
            room_arc
        };

        flush_room(&self.store, document_id, &evicted).await;
    }

    /// Accept an edit: buffer it, bump the version, immediately rebroadcast
    /// to every other member, and make sure a debounced flush is scheduled.
    /// An already pending flush timer is left alone so a burst of edits
    /// lands in one write.
    ///
    /// Edits are never rejected here; one without a content snapshot still
    /// advances the version and is still broadcast.
    pub async fn receive_edit(
        &self,
        document_id: &str,
        origin_connection: &str,
        user: UserInfo,
        content: Option<String>,
    ) -> i64 {
        let room_arc = self.get_or_create(document_id, true).await;
        let mut room = room_arc.lock().await;
        room.loaded = true;
        room.version += 1;
        let version = room.version;

        room.pending.push(EditRecord {
            origin_connection: origin_connection.to_string(),
            user: user.clone(),
            content: content.clone(),
            version,
        });

        let broadcast = ServerMessage::DocUpdate(DocUpdateBroadcast {
            document_id: document_id.to_string(),
            content,
            user,
            version,
        });
        for (member_id, handle) in room.members.iter() {
            if member_id != origin_connection {
                handle.send(broadcast.clone());
            }
        }

        if room.flush_timer.is_none() {
            let store = Arc::clone(&self.store);
            let doc = document_id.to_string();
            let delay = self.flush_delay;
            let timer_room = Arc::clone(&room_arc);
            room.flush_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                flush_room(&store, &doc, &timer_room).await;
            }));
        }

        version
    }

    /// Flush a room's buffered edits now, if the room still exists.
    pub async fn flush(&self, document_id: &str) {
        let room = {
            let rooms = self.rooms.read().await;
            rooms.get(document_id).cloned()
        };
        if let Some(room) = room {
            flush_room(&self.store, document_id, &room).await;
        }
    }

    /// Send to every member of a room except the originating connection.
    pub async fn broadcast_to_others(
        &self,
        document_id: &str,
        origin_connection: &str,
        msg: ServerMessage,
    ) {
        let room = {
            let rooms = self.rooms.read().await;
            rooms.get(document_id).cloned()
        };
        let Some(room) = room else { return };
        let room = room.lock().await;
        for (member_id, handle) in room.members.iter() {
            if member_id != origin_connection {
                handle.send(msg.clone());
            }
        }
    }

    /// Send to every member of a room, the originator included.
    pub async fn broadcast_to_all(&self, document_id: &str, msg: ServerMessage) {
        let room = {
            let rooms = self.rooms.read().await;
            rooms.get(document_id).cloned()
        };
        let Some(room) = room else { return };
        let room = room.lock().await;
        for handle in room.members.values() {
            handle.send(msg.clone());
        }
    }

    /// Documents a connection is currently a member of, derived from actual
    /// room membership so disconnect cleanup cannot drift from reality.
    pub async fn rooms_for_connection(&self, connection_id: &str) -> Vec<String> {
        let rooms = self.rooms.read().await;
        let mut joined = Vec::new();
        for (document_id, room) in rooms.iter() {
            let room = room.lock().await;
            if room.members.contains_key(connection_id) {
                joined.push(document_id.clone());
            }
        }
        joined
    }

    /// (rooms, member connections, buffered edits) across all live rooms.
    pub async fn stats(&self) -> (usize, usize, usize) {
        let rooms = self.rooms.read().await;
        let mut members = 0;
        let mut pending = 0;
        for room in rooms.values() {
            let room = room.lock().await;
            members += room.members.len();
            pending += room.pending.len();
        }
        (rooms.len(), members, pending)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    #[cfg(test)]
    async fn has_room(&self, document_id: &str) -> bool {
        self.rooms.read().await.contains_key(document_id)
    }

    #[cfg(test)]
    async fn flush_pending(&self, document_id: &str) -> bool {
        let rooms = self.rooms.read().await;
        match rooms.get(document_id) {
            Some(room) => room.lock().await.flush_timer.is_some(),
            None => false,
        }
    }
}

/// Persist a room's buffered edits: the last edit of the batch wins and is
/// written out once; everything earlier in the buffer is discarded. The
/// in-memory snapshot advances only on a successful write. A failed write is
/// logged and not retried — the next edit starts the next debounce window
/// and with it the next attempt.
///
/// The room lock is held only for the copy-and-clear of the buffer, never
/// across the storage write.
async fn flush_room(
    store: &Arc<dyn DocumentStore>,
    document_id: &str,
    room_arc: &Arc<Mutex<Room>>,
) {
    let content = {
        let mut room = room_arc.lock().await;
        // Detach rather than abort: this may be the timer task itself.
        room.flush_timer.take();
        if room.pending.is_empty() {
            return;
        }
        let last = &room.pending[room.pending.len() - 1];
        info!(
            "Flushing document {} at v{}: last write by user {} (connection {})",
            document_id, last.version, last.user.id, last.origin_connection
        );
        let content = match &last.content {
            Some(content) => content.clone(),
            // Content-less batch: re-persist what we already have.
            None => room.snapshot.clone(),
        };
        room.pending.clear();
        content
    };

    match store.save_document(document_id, &content, Utc::now()).await {
        Ok(()) => {
            let mut room = room_arc.lock().await;
            room.snapshot = content;
        }
        Err(e) => {
            error!("Failed to persist document {}: {}", document_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::docstore::testing::MemoryDocumentStore;

    const FLUSH_MS: u64 = 40;

    fn manager(store: Arc<MemoryDocumentStore>) -> Arc<RoomManager> {
        Arc::new(RoomManager::new(store, Duration::from_millis(FLUSH_MS)))
    }

    fn user(id: &str) -> UserInfo {
        UserInfo {
            id: id.to_string(),
            name: format!("user-{}", id),
            roles: vec![],
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(FLUSH_MS * 3)).await;
    }

    #[tokio::test]
    async fn version_advances_once_per_edit_even_without_content() {
        let store = Arc::new(MemoryDocumentStore::new());
        let manager = manager(store);
        let (a, _rx) = ConnectionHandle::new();
        manager.add_connection("doc1", a.clone()).await;

        let v1 = manager.receive_edit("doc1", &a.id, user("u1"), Some("x".into())).await;
        let v2 = manager.receive_edit("doc1", &a.id, user("u1"), None).await;
        let v3 = manager.receive_edit("doc1", &a.id, user("u1"), Some("y".into())).await;
        assert_eq!((v1, v2, v3), (1, 2, 3));
    }

    #[tokio::test]
    async fn init_reads_store_once_then_serves_memory() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.put("doc1", "hello", Some(1));
        let manager = manager(store.clone());

        let init_a = manager.init_from_store("doc1").await;
        assert_eq!(init_a.snapshot, "hello");
        assert_eq!(init_a.version, 1);

        let init_b = manager.init_from_store("doc1").await;
        assert_eq!(init_b.snapshot, "hello");
        assert_eq!(init_b.version, 1);
        assert_eq!(store.load_calls(), 1);
    }

    #[tokio::test]
    async fn init_of_missing_document_starts_empty() {
        let store = Arc::new(MemoryDocumentStore::new());
        let manager = manager(store);

        let init = manager.init_from_store("doc1").await;
        assert_eq!(init.snapshot, "");
        assert_eq!(init.version, 0);
    }

    #[tokio::test]
    async fn init_survives_store_failure_and_retries_next_join() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.put("doc1", "hello", Some(4));
        store.fail_loads(true);
        let manager = manager(store.clone());

        let init = manager.init_from_store("doc1").await;
        assert_eq!(init.snapshot, "");
        assert_eq!(init.version, 0);

        store.fail_loads(false);
        let init = manager.init_from_store("doc1").await;
        assert_eq!(init.snapshot, "hello");
        assert_eq!(init.version, 4);
    }

    #[tokio::test]
    async fn edit_broadcasts_to_other_members_only() {
        let store = Arc::new(MemoryDocumentStore::new());
        let manager = manager(store);
        let (a, mut rx_a) = ConnectionHandle::new();
        let (b, mut rx_b) = ConnectionHandle::new();
        manager.add_connection("doc1", a.clone()).await;
        manager.add_connection("doc1", b.clone()).await;
        manager.init_from_store("doc1").await;

        manager.receive_edit("doc1", &a.id, user("u1"), Some("hello world".into())).await;

        match rx_b.try_recv() {
            Ok(ServerMessage::DocUpdate(update)) => {
                assert_eq!(update.content.as_deref(), Some("hello world"));
                assert_eq!(update.version, 1);
                assert_eq!(update.user.id, "u1");
            }
            other => panic!("expected doc:update for b, got {:?}", other),
        }
        assert!(rx_a.try_recv().is_err(), "originator must not receive an echo");
    }

    #[tokio::test]
    async fn debounced_flush_persists_last_edit_of_batch() {
        let store = Arc::new(MemoryDocumentStore::new());
        let manager = manager(store.clone());
        let (a, _rx_a) = ConnectionHandle::new();
        let (b, _rx_b) = ConnectionHandle::new();
        manager.add_connection("doc1", a.clone()).await;
        manager.add_connection("doc1", b.clone()).await;

        manager.receive_edit("doc1", &a.id, user("u1"), Some("foo".into())).await;
        manager.receive_edit("doc1", &b.id, user("u2"), Some("bar".into())).await;
        assert!(manager.flush_pending("doc1").await);

        settle().await;
        assert_eq!(store.saves(), vec![("doc1".to_string(), "bar".to_string())]);
        assert!(!manager.flush_pending("doc1").await);

        // A new edit after the flush opens a fresh debounce window.
        manager.receive_edit("doc1", &a.id, user("u1"), Some("baz".into())).await;
        settle().await;
        assert_eq!(store.saves().len(), 2);
        assert_eq!(store.saves()[1], ("doc1".to_string(), "baz".to_string()));
    }

    #[tokio::test]
    async fn content_less_batch_repersists_current_snapshot() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.put("doc1", "hello", Some(1));
        let manager = manager(store.clone());
        let (a, _rx) = ConnectionHandle::new();
        manager.add_connection("doc1", a.clone()).await;
        manager.init_from_store("doc1").await;

        manager.receive_edit("doc1", &a.id, user("u1"), None).await;
        settle().await;
        assert_eq!(store.saves(), vec![("doc1".to_string(), "hello".to_string())]);
    }

    #[tokio::test]
    async fn explicit_flush_writes_now_and_timer_becomes_noop() {
        let store = Arc::new(MemoryDocumentStore::new());
        let manager = manager(store.clone());
        let (a, _rx) = ConnectionHandle::new();
        manager.add_connection("doc1", a.clone()).await;
        manager.init_from_store("doc1").await;

        // Nothing buffered: flush is a no-op.
        manager.flush("doc1").await;
        assert!(store.saves().is_empty());

        manager.receive_edit("doc1", &a.id, user("u1"), Some("now".into())).await;
        manager.flush("doc1").await;
        assert_eq!(store.saves(), vec![("doc1".to_string(), "now".to_string())]);

        // The already scheduled timer finds an empty buffer and writes nothing.
        settle().await;
        assert_eq!(store.saves().len(), 1);
    }

    #[tokio::test]
    async fn last_leave_flushes_and_evicts() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.put("doc1", "hello", Some(1));
        let manager = manager(store.clone());
        let (a, _rx_a) = ConnectionHandle::new();
        let (b, _rx_b) = ConnectionHandle::new();
        manager.add_connection("doc1", a.clone()).await;
        manager.add_connection("doc1", b.clone()).await;
        manager.init_from_store("doc1").await;
        manager.receive_edit("doc1", &a.id, user("u1"), Some("draft".into())).await;

        // One member leaving does not evict or flush.
        manager.remove_connection("doc1", &a.id).await;
        assert!(manager.has_room("doc1").await);
        assert!(store.saves().is_empty());

        // Last member leaving flushes the buffer and evicts the room.
        manager.remove_connection("doc1", &b.id).await;
        assert!(!manager.has_room("doc1").await);
        assert_eq!(store.saves(), vec![("doc1".to_string(), "draft".to_string())]);

        // A later init must re-read storage, not resurrect evicted state.
        store.put("doc1", "rewritten elsewhere", Some(9));
        let init = manager.init_from_store("doc1").await;
        assert_eq!(init.snapshot, "rewritten elsewhere");
        assert_eq!(init.version, 9);
        assert_eq!(store.load_calls(), 2);
    }

    #[tokio::test]
    async fn failed_flush_keeps_snapshot_and_does_not_retry() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.put("doc1", "hello", Some(1));
        let manager = manager(store.clone());
        let (a, _rx) = ConnectionHandle::new();
        manager.add_connection("doc1", a.clone()).await;
        manager.init_from_store("doc1").await;

        store.fail_saves(true);
        manager.receive_edit("doc1", &a.id, user("u1"), Some("doomed".into())).await;
        settle().await;

        // One attempt, no retry, snapshot unchanged.
        assert_eq!(store.saves().len(), 1);
        let init = manager.init_from_store("doc1").await;
        assert_eq!(init.snapshot, "hello");
        assert_eq!(init.version, 2);
    }

    #[tokio::test]
    async fn edit_before_join_creates_authoritative_room() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.put("doc1", "from store", Some(5));
        let manager = manager(store.clone());
        let (a, _rx) = ConnectionHandle::new();

        manager.receive_edit("doc1", &a.id, user("u1"), Some("raced ahead".into())).await;

        // The room born from the edit is authoritative; init must not
        // overwrite it from storage.
        let init = manager.init_from_store("doc1").await;
        assert_eq!(init.version, 1);
        assert_eq!(store.load_calls(), 0);
    }

    #[tokio::test]
    async fn rooms_for_connection_reflects_membership() {
        let store = Arc::new(MemoryDocumentStore::new());
        let manager = manager(store);
        let (a, _rx) = ConnectionHandle::new();
        manager.add_connection("doc1", a.clone()).await;
        manager.add_connection("doc2", a.clone()).await;

        let mut joined = manager.rooms_for_connection(&a.id).await;
        joined.sort();
        assert_eq!(joined, vec!["doc1".to_string(), "doc2".to_string()]);

        manager.remove_connection("doc1", &a.id).await;
        assert_eq!(manager.rooms_for_connection(&a.id).await, vec!["doc2".to_string()]);
    }
}
