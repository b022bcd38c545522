//! SQLite offline cache
//!
//! Holds the last confirmed state of every document the client has seen and
//! the queue of writes not yet acknowledged by the backend. Both survive a
//! restart when the cache is file-backed.
//!
//! ## Tables
//!
//! - `schema_info` - schema version
//! - `documents` - confirmed documents, keyed by (collection, id)
//! - `pending_writes` - queued mutations in submission order

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::document::{Document, Fields, Mutation, PendingWrite};
use crate::error::{StoreError, StoreResult};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the cache schema
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            owner TEXT,
            fields TEXT NOT NULL,
            created_at INTEGER,
            updated_at INTEGER,
            version INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        );

        CREATE TABLE IF NOT EXISTS pending_writes (
            seq INTEGER PRIMARY KEY,
            collection TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            mutation TEXT NOT NULL,
            local_time INTEGER NOT NULL
        );

        -- Owner-scoped reads
        CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(collection, owner);
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<Option<i32>> {
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_info WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.and_then(|v| v.parse().ok()))
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}

/// Persistent local cache
pub struct LocalCache {
    conn: Connection,
}

impl LocalCache {
    /// Open or create the cache database at `path`
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        if needs_init(&conn) {
            init_schema(&conn)?;
        }
        Ok(Self { conn })
    }

    /// Open a cache that lives only as long as the process
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    // ==================== Documents ====================

    /// Every confirmed document, grouped by collection
    pub fn load_documents(&self) -> StoreResult<Vec<(String, Document)>> {
        let mut stmt = self.conn.prepare(
            "SELECT collection, id, fields, created_at, updated_at, version FROM documents",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut documents = Vec::new();
        for row in rows {
            let (collection, id, fields, created_at, updated_at, version) = row?;
            let fields: Fields = serde_json::from_str(&fields)?;
            documents.push((
                collection,
                Document {
                    id,
                    fields,
                    created_at: created_at.and_then(from_micros),
                    updated_at: updated_at.and_then(from_micros),
                    version: version as u64,
                    has_pending_writes: false,
                },
            ));
        }
        Ok(documents)
    }

    /// Insert or replace a confirmed document
    pub fn put_document(&self, collection: &str, doc: &Document) -> StoreResult<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO documents
                (collection, id, owner, fields, created_at, updated_at, version)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                collection,
                doc.id,
                doc.owner(),
                serde_json::to_string(&doc.fields)?,
                doc.created_at.map(|t| t.timestamp_micros()),
                doc.updated_at.map(|t| t.timestamp_micros()),
                doc.version as i64,
            ],
        )?;
        Ok(())
    }

    /// Forget a confirmed document
    pub fn remove_document(&self, collection: &str, id: &str) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM documents WHERE collection = ? AND id = ?",
            params![collection, id],
        )?;
        Ok(())
    }

    pub fn document_count(&self) -> StoreResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?)
    }

    // ==================== Pending writes ====================

    /// Append a write to the queue
    pub fn push_pending(&self, write: &PendingWrite) -> StoreResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO pending_writes (seq, collection, doc_id, mutation, local_time)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                write.seq as i64,
                write.collection,
                write.doc_id,
                serde_json::to_string(&write.mutation)?,
                write.local_time.timestamp_micros(),
            ],
        )?;
        Ok(())
    }

    /// Drop an acknowledged or rejected write
    pub fn remove_pending(&self, seq: u64) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM pending_writes WHERE seq = ?", [seq as i64])?;
        Ok(())
    }

    /// Queued writes in submission order
    pub fn load_pending(&self) -> StoreResult<Vec<PendingWrite>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, collection, doc_id, mutation, local_time FROM pending_writes ORDER BY seq",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut writes = Vec::new();
        for row in rows {
            let (seq, collection, doc_id, mutation, local_time) = row?;
            let mutation: Mutation = serde_json::from_str(&mutation)?;
            writes.push(PendingWrite {
                seq: seq as u64,
                collection,
                doc_id,
                mutation,
                local_time: from_micros(local_time).unwrap_or_else(Utc::now),
            });
        }
        Ok(writes)
    }

    /// Wipe documents and queue
    pub fn clear(&self) -> StoreResult<()> {
        self.conn
            .execute_batch("DELETE FROM documents; DELETE FROM pending_writes;")?;
        Ok(())
    }
}

fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(id: &str, owner: &str) -> Document {
        Document {
            id: id.to_string(),
            fields: json!({"userId": owner, "text": "Mist the orchid"})
                .as_object()
                .cloned()
                .unwrap(),
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
            version: 3,
            has_pending_writes: false,
        }
    }

    fn pending(seq: u64, doc_id: &str) -> PendingWrite {
        PendingWrite {
            seq,
            collection: "items".to_string(),
            doc_id: doc_id.to_string(),
            mutation: Mutation::Delete,
            local_time: Utc::now(),
        }
    }

    #[test]
    fn test_schema_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(needs_init(&conn));

        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
        assert!(!needs_init(&conn));
    }

    #[test]
    fn test_document_roundtrip_keeps_micros() {
        let cache = LocalCache::open_in_memory().unwrap();
        let original = doc("a", "u1");
        cache.put_document("items", &original).unwrap();

        let loaded = cache.load_documents().unwrap();
        assert_eq!(loaded.len(), 1);
        let (collection, loaded) = &loaded[0];
        assert_eq!(collection, "items");
        assert_eq!(loaded.fields, original.fields);
        assert_eq!(loaded.version, 3);
        assert_eq!(
            loaded.created_at.map(|t| t.timestamp_micros()),
            original.created_at.map(|t| t.timestamp_micros())
        );
    }

    #[test]
    fn test_put_replaces_and_remove_deletes() {
        let cache = LocalCache::open_in_memory().unwrap();
        cache.put_document("items", &doc("a", "u1")).unwrap();
        cache.put_document("items", &doc("a", "u2")).unwrap();
        assert_eq!(cache.document_count().unwrap(), 1);

        cache.remove_document("items", "a").unwrap();
        assert_eq!(cache.document_count().unwrap(), 0);
    }

    #[test]
    fn test_pending_queue_order() {
        let cache = LocalCache::open_in_memory().unwrap();
        cache.push_pending(&pending(2, "b")).unwrap();
        cache.push_pending(&pending(1, "a")).unwrap();
        cache.push_pending(&pending(3, "c")).unwrap();
        cache.remove_pending(2).unwrap();

        let seqs: Vec<u64> = cache.load_pending().unwrap().iter().map(|w| w.seq).collect();
        assert_eq!(seqs, vec![1, 3]);
    }

    #[test]
    fn test_cache_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("cache.db");

        {
            let cache = LocalCache::open(&path).unwrap();
            cache.put_document("items", &doc("a", "u1")).unwrap();
            cache.push_pending(&pending(1, "a")).unwrap();
        }

        let cache = LocalCache::open(&path).unwrap();
        assert_eq!(cache.load_documents().unwrap().len(), 1);
        assert_eq!(cache.load_pending().unwrap().len(), 1);
    }

    #[test]
    fn test_clear() {
        let cache = LocalCache::open_in_memory().unwrap();
        cache.put_document("items", &doc("a", "u1")).unwrap();
        cache.push_pending(&pending(1, "a")).unwrap();

        cache.clear().unwrap();
        assert_eq!(cache.document_count().unwrap(), 0);
        assert!(cache.load_pending().unwrap().is_empty());
    }
}
