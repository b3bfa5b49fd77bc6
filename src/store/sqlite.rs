//! SQLite backend - one row per record kind

use super::backend::{RecordBackend, RecordKind, StoreError};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordBackend for SqliteBackend {
    async fn ensure_ready(&self) -> Result<(), StoreError> {
        self.conn().execute(
            "CREATE TABLE IF NOT EXISTS records (
                kind TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        log::debug!("✅ SQLite records table ready");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let conn = self.conn();
        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'records'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)?;
        if exists {
            conn.execute("DELETE FROM records", [])?;
        }
        Ok(())
    }

    async fn read(&self, kind: RecordKind) -> Result<Option<String>, StoreError> {
        let body = self
            .conn()
            .query_row(
                "SELECT body FROM records WHERE kind = ?1",
                params![kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(body)
    }

    async fn write(&self, kind: RecordKind, body: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO records (kind, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(kind) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![kind.as_str(), body, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
