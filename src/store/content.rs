//! Rendered-content database
//!
//! One row per content key, replaced atomically on every successful
//! conversion. Readers never observe a partially written page: the upsert
//! is a single `INSERT OR REPLACE` statement and WAL keeps old snapshots
//! visible until the write commits.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{AllowedMethods, ContentRecord};
use crate::store::with_busy_retry;

/// SQLite-backed store for rendered pages
///
/// Thread-safe through a `Mutex` on the connection; conversion workers
/// funnel their writes through one handle.
pub struct ContentStore {
    conn: Mutex<Connection>,
}

impl ContentStore {
    /// Open (or create) the content database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "Content store opened");
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pages (
                content_key TEXT PRIMARY KEY,
                source_hash TEXT NOT NULL,
                rendered_html TEXT NOT NULL,
                title TEXT NOT NULL,
                allowed_methods TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pages_updated_at
                ON pages(updated_at);
            "#,
        )?;
        Ok(())
    }

    /// Insert or replace a page in one atomic statement
    pub fn upsert_page(&self, record: &ContentRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        with_busy_retry(|| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO pages
                    (content_key, source_hash, rendered_html, title, allowed_methods, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    record.content_key,
                    record.source_hash,
                    record.rendered_html,
                    record.title,
                    record.allowed_methods.to_storage(),
                    record.updated_at.to_rfc3339(),
                ],
            )
        })?;

        tracing::debug!(key = %record.content_key, "Page stored");
        Ok(())
    }

    /// Remove a page; returns whether a row existed
    pub fn delete_page(&self, content_key: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = with_busy_retry(|| {
            conn.execute("DELETE FROM pages WHERE content_key = ?1", params![content_key])
        })?;
        Ok(affected > 0)
    }

    /// Fetch a page by content key
    pub fn get_page(&self, content_key: &str) -> Result<Option<ContentRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                r#"
                SELECT content_key, source_hash, rendered_html, title, allowed_methods, updated_at
                FROM pages WHERE content_key = ?1
                "#,
                params![content_key],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Fetch just the stored source hash, for change detection
    pub fn get_source_hash(&self, content_key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let hash = conn
            .query_row(
                "SELECT source_hash FROM pages WHERE content_key = ?1",
                params![content_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// All content keys currently stored, for orphan cleanup
    pub fn all_keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT content_key FROM pages ORDER BY content_key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    /// All pages under one scope, for listings
    pub fn pages_for_scope(&self, scope: &str) -> Result<Vec<ContentRecord>> {
        let prefix = format!("{scope}:/%");
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT content_key, source_hash, rendered_html, title, allowed_methods, updated_at
            FROM pages
            WHERE content_key LIKE ?1
            ORDER BY content_key
            "#,
        )?;
        let records = stmt
            .query_map(params![prefix], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Number of stored pages
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentRecord> {
        let methods: String = row.get(4)?;
        let updated: String = row.get(5)?;
        Ok(ContentRecord {
            content_key: row.get(0)?,
            source_hash: row.get(1)?,
            rendered_html: row.get(2)?,
            title: row.get(3)?,
            allowed_methods: AllowedMethods::from_storage(&methods),
            updated_at: DateTime::parse_from_rfc3339(&updated)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}
