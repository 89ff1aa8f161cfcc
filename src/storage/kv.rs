//! Key-value medium backing the local mirror and the offline queue.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// Synchronous string-keyed storage, the "local storage" of this client.
pub trait KeyValueStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>>;

  fn set(&self, key: &str, value: &str) -> Result<()>;

  fn remove(&self, key: &str) -> Result<()>;

  /// All keys, sorted.
  fn keys(&self) -> Result<Vec<String>>;
}

/// Store that only lives as long as the process.
#[derive(Default)]
pub struct MemoryKvStore {
  entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKvStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KeyValueStore for MemoryKvStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.keys().cloned().collect())
  }
}

/// SQLite-backed key-value store.
pub struct SqliteKvStore {
  conn: Mutex<Connection>,
}

impl SqliteKvStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(())
  }
}

const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl KeyValueStore for SqliteKvStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read key {}: {}", key, e))
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write key {}: {}", key, e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM kv_store WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove key {}: {}", key, e))?;

    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT key FROM kv_store ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(keys)
  }
}
