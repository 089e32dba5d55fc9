//! SQLite-backed local store.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{LocalStore, WriteOp};
use crate::error::{Error, Result};

/// Schema for the key-value table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

/// SQLite-based local store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::StorageUnavailable(format!("Failed to create store directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::StorageUnavailable(format!(
        "Failed to open store at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::from_connection(conn)
  }

  /// A private store that disappears with the process.
  pub fn open_in_memory() -> Result<Self> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    // journal_mode answers with the mode it ended up in; in-memory stays "memory"
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    // A committed write must hit disk before we report success
    conn.pragma_update(None, "synchronous", "FULL")?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| Error::StorageUnavailable(format!("Failed to run store migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::StorageUnavailable("Could not determine data directory".into()))?;

    Ok(data_dir.join("dealstash").join("store.db"))
  }
}

impl LocalStore for SqliteStore {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    let conn = self.conn.lock()?;

    let value: Option<Vec<u8>> = conn
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()?;

    Ok(value)
  }

  fn set(&self, key: &str, value: &[u8]) -> Result<()> {
    let conn = self.conn.lock()?;

    conn.execute(
      "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, ?)",
      params![key, value, Utc::now().timestamp_millis()],
    )?;

    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    let conn = self.conn.lock()?;
    conn.execute("DELETE FROM kv WHERE key = ?", params![key])?;
    Ok(())
  }

  fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
    let conn = self.conn.lock()?;

    let mut stmt = conn.prepare(
      "SELECT key, value FROM kv
       WHERE substr(key, 1, length(?1)) = ?1
       ORDER BY key",
    )?;

    let rows = stmt
      .query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))?
      .collect::<rusqlite::Result<Vec<(String, Vec<u8>)>>>()?;

    Ok(rows)
  }

  fn apply(&self, batch: &[WriteOp]) -> Result<()> {
    let mut conn = self.conn.lock()?;
    let now = Utc::now().timestamp_millis();

    let tx = conn.transaction()?;
    for op in batch {
      match op {
        WriteOp::Set { key, value } => {
          tx.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, ?)",
            params![key, value, now],
          )?;
        }
        WriteOp::Delete { key } => {
          tx.execute("DELETE FROM kv WHERE key = ?", params![key])?;
        }
      }
    }
    // Dropping an uncommitted transaction rolls it back
    tx.commit()?;

    Ok(())
  }
}
