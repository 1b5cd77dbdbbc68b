use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Current persisted state of a document, as returned by the store.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub content: String,
    pub version_hint: Option<i64>,
}

pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Durable document storage consumed by the room manager.
///
/// Both operations may fail; the caller never assumes the store is in sync
/// with in-memory room state.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load_document(&self, document_id: &str) -> Result<Option<StoredDocument>, StoreError>;

    async fn save_document(
        &self,
        document_id: &str,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// PostgreSQL-backed document store.
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Create a new store from a PostgreSQL connection string.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        info!("Document store connected");
        Ok(Self { pool })
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn load_document(&self, document_id: &str) -> Result<Option<StoredDocument>, StoreError> {
        let doc_uuid = Uuid::parse_str(document_id)
            .map_err(|e| format!("Invalid document UUID '{}': {}", document_id, e))?;

        let query_sql = r#"
            SELECT content, latest_version
            FROM documents
            WHERE id = $1 AND deleted = FALSE
        "#;

        let row = sqlx::query(query_sql)
            .bind(doc_uuid)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| StoredDocument {
            content: r.get::<Option<String>, _>("content").unwrap_or_default(),
            version_hint: r.get::<Option<i64>, _>("latest_version"),
        }))
    }

    async fn save_document(
        &self,
        document_id: &str,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let doc_uuid = Uuid::parse_str(document_id)
            .map_err(|e| format!("Invalid document UUID '{}': {}", document_id, e))?;

        let query_sql = r#"
            UPDATE documents
            SET content = $2, updated_at = $3
            WHERE id = $1 AND deleted = FALSE
        "#;

        let result = sqlx::query(query_sql)
            .bind(doc_uuid)
            .bind(content)
            .bind(updated_at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            // Same as the document being gone from under a live room: the
            // write is dropped, the session keeps running on memory.
            warn!("Document {} not found on save, nothing persisted", document_id);
        }
        Ok(())
    }
}

/// Stand-in used when no database URL is configured: every operation fails,
/// rooms start from empty snapshots and flushes are logged and dropped.
pub struct NullDocumentStore;

#[async_trait]
impl DocumentStore for NullDocumentStore {
    async fn load_document(&self, _document_id: &str) -> Result<Option<StoredDocument>, StoreError> {
        Err("document store not configured".into())
    }

    async fn save_document(
        &self,
        _document_id: &str,
        _content: &str,
        _updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Err("document store not configured".into())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory store for exercising the room manager without Postgres.
    #[derive(Default)]
    pub struct MemoryDocumentStore {
        docs: Mutex<HashMap<String, StoredDocument>>,
        saves: Mutex<Vec<(String, String)>>,
        load_calls: AtomicUsize,
        fail_loads: AtomicBool,
        fail_saves: AtomicBool,
    }

    impl MemoryDocumentStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put(&self, document_id: &str, content: &str, version_hint: Option<i64>) {
            self.docs.lock().unwrap().insert(
                document_id.to_string(),
                StoredDocument {
                    content: content.to_string(),
                    version_hint,
                },
            );
        }

        pub fn saves(&self) -> Vec<(String, String)> {
            self.saves.lock().unwrap().clone()
        }

        pub fn load_calls(&self) -> usize {
            self.load_calls.load(Ordering::SeqCst)
        }

        pub fn fail_loads(&self, fail: bool) {
            self.fail_loads.store(fail, Ordering::SeqCst);
        }

        pub fn fail_saves(&self, fail: bool) {
            self.fail_saves.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DocumentStore for MemoryDocumentStore {
        async fn load_document(
            &self,
            document_id: &str,
        ) -> Result<Option<StoredDocument>, StoreError> {
            self.load_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_loads.load(Ordering::SeqCst) {
                return Err("store unavailable".into());
            }
            Ok(self.docs.lock().unwrap().get(document_id).cloned())
        }

        async fn save_document(
            &self,
            document_id: &str,
            content: &str,
            _updated_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.saves
                .lock()
                .unwrap()
                .push((document_id.to_string(), content.to_string()));
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err("store unavailable".into());
            }
            self.docs.lock().unwrap().insert(
                document_id.to_string(),
                StoredDocument {
                    content: content.to_string(),
                    version_hint: None,
                },
            );
            Ok(())
        }
    }
}
