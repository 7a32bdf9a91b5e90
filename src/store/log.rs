//! Operator event log
//!
//! Supervisor lifecycle events (launches, restarts, crashes, shutdowns) are
//! appended here so `status` can show recent history after the console that
//! started the stack is long gone.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::store::with_busy_retry;

/// A single persisted event
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub component: String,
    pub message: String,
}

impl LogEvent {
    pub fn info(component: &str, message: impl Into<String>) -> Self {
        Self::new("info", component, message)
    }

    pub fn warn(component: &str, message: impl Into<String>) -> Self {
        Self::new("warn", component, message)
    }

    pub fn error(component: &str, message: impl Into<String>) -> Self {
        Self::new("error", component, message)
    }

    fn new(level: &str, component: &str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: level.to_string(),
            component: component.to_string(),
            message: message.into(),
        }
    }
}

/// Append-only event log with size-capped pruning
pub struct LogStore {
    conn: Mutex<Connection>,
}

impl LogStore {
    /// Open (or create) the event log at `path`
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
        Ok(store)
    }

    /// Create an in-memory log store (for testing)
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
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                level TEXT NOT NULL,
                component TEXT NOT NULL,
                message TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_timestamp
                ON events(timestamp);
            "#,
        )?;
        Ok(())
    }

    /// Append an event
    pub fn append(&self, event: &LogEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        with_busy_retry(|| {
            conn.execute(
                "INSERT INTO events (timestamp, level, component, message) VALUES (?1, ?2, ?3, ?4)",
                params![
                    event.timestamp.to_rfc3339(),
                    event.level,
                    event.component,
                    event.message,
                ],
            )
        })?;
        Ok(())
    }

    /// Most recent `limit` events, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<LogEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT timestamp, level, component, message FROM events ORDER BY id DESC LIMIT ?1",
        )?;
        let events = stmt
            .query_map(params![limit as i64], |row| {
                let ts: String = row.get(0)?;
                Ok(LogEvent {
                    timestamp: DateTime::parse_from_rfc3339(&ts)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    level: row.get(1)?,
                    component: row.get(2)?,
                    message: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Total number of stored events
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Drop the oldest events until the database fits under `max_size_mb`.
    /// Runs opportunistically after bursts of appends, not on every write.
    pub fn prune_to_max_size(&self, max_size_mb: u64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let max_bytes = max_size_mb * 1024 * 1024;

        let mut removed = 0usize;
        loop {
            let page_count: u64 =
                conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
            let page_size: u64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
            if page_count * page_size <= max_bytes {
                break;
            }

            let affected = with_busy_retry(|| {
                conn.execute(
                    "DELETE FROM events WHERE id IN (SELECT id FROM events ORDER BY id ASC LIMIT 500)",
                    [],
                )
            })?;
            if affected == 0 {
                break;
            }
            removed += affected;
            // Deleted pages only shrink the file after a vacuum
            conn.execute_batch("VACUUM;")?;
        }

        if removed > 0 {
            tracing::info!(removed, "Pruned event log");
        }
        Ok(removed)
    }
}
