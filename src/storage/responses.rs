//! Named response caches used by the worker.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use crate::http::{HttpResponse, Method};

/// Stable cache key for a request: SHA256 of `"METHOD url"`.
pub fn request_key(method: Method, url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(format!("{} {}", method, url).as_bytes());
  hex::encode(hasher.finalize())
}

/// A response about to be stored.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: String,
  pub url: String,
  pub response: HttpResponse,
}

impl CacheEntry {
  pub fn new(method: Method, url: &str, response: HttpResponse) -> Self {
    Self {
      key: request_key(method, url),
      url: url.to_string(),
      response,
    }
  }
}

/// A stored response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: HttpResponse,
  pub cached_at: DateTime<Utc>,
}

/// Trait for response cache backends.
pub trait CacheStorage: Send + Sync {
  /// Create the named cache if it does not exist.
  fn open(&self, cache: &str) -> Result<()>;

  /// Store one response, replacing any previous one for the same key.
  fn put(&self, cache: &str, entry: &CacheEntry) -> Result<()>;

  /// Store every entry or none of them.
  fn put_all(&self, cache: &str, entries: &[CacheEntry]) -> Result<()>;

  fn lookup(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>>;

  fn has_cache(&self, cache: &str) -> Result<bool>;

  fn cache_names(&self) -> Result<Vec<String>>;

  /// Returns whether the cache existed.
  fn delete_cache(&self, cache: &str) -> Result<bool>;
}

/// In-process response caches.
#[derive(Default)]
pub struct MemoryCacheStorage {
  caches: Mutex<BTreeMap<String, BTreeMap<String, CachedResponse>>>,
}

impl MemoryCacheStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryCacheStorage {
  fn open(&self, cache: &str) -> Result<()> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    caches.entry(cache.to_string()).or_default();
    Ok(())
  }

  fn put(&self, cache: &str, entry: &CacheEntry) -> Result<()> {
    self.put_all(cache, std::slice::from_ref(entry))
  }

  fn put_all(&self, cache: &str, entries: &[CacheEntry]) -> Result<()> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let target = caches.entry(cache.to_string()).or_default();
    let now = Utc::now();
    for entry in entries {
      target.insert(
        entry.key.clone(),
        CachedResponse {
          response: entry.response.clone(),
          cached_at: now,
        },
      );
    }
    Ok(())
  }

  fn lookup(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(caches.get(cache).and_then(|c| c.get(key)).cloned())
  }

  fn has_cache(&self, cache: &str) -> Result<bool> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(caches.contains_key(cache))
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(caches.keys().cloned().collect())
  }

  fn delete_cache(&self, cache: &str) -> Result<bool> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(caches.remove(cache).is_some())
  }
}

/// SQLite-based response cache storage.
pub struct SqliteCacheStorage {
  conn: Mutex<Connection>,
}

impl SqliteCacheStorage {
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for response cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cached_responses (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_key),
    FOREIGN KEY (cache_name) REFERENCES caches(name) ON DELETE CASCADE
);
"#;

fn insert_entry(conn: &Connection, cache: &str, entry: &CacheEntry) -> Result<()> {
  let headers = serde_json::to_string(&entry.response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cached_responses
         (cache_name, request_key, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        cache,
        entry.key,
        entry.url,
        entry.response.status,
        headers,
        entry.response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store response for {}: {}", entry.url, e))?;

  Ok(())
}

impl CacheStorage for SqliteCacheStorage {
  fn open(&self, cache: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO caches (name) VALUES (?)",
        params![cache],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", cache, e))?;

    Ok(())
  }

  fn put(&self, cache: &str, entry: &CacheEntry) -> Result<()> {
    self.put_all(cache, std::slice::from_ref(entry))
  }

  fn put_all(&self, cache: &str, entries: &[CacheEntry]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?)",
      params![cache],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", cache, e))?;

    for entry in entries {
      insert_entry(&tx, cache, entry)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn lookup(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cached_responses
         WHERE cache_name = ? AND request_key = ?",
        params![cache, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache {}: {}", cache, e))?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
        Ok(Some(CachedResponse {
          response: HttpResponse {
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn has_cache(&self, cache: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM caches WHERE name = ?",
        params![cache],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query caches: {}", e))?;

    Ok(found.is_some())
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_cache(&self, cache: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM cached_responses WHERE cache_name = ?",
        params![cache],
      )
      .map_err(|e| eyre!("Failed to clear cache {}: {}", cache, e))?;

    let removed = conn
      .execute("DELETE FROM caches WHERE name = ?", params![cache])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache, e))?;

    Ok(removed > 0)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(url: &str, body: &str) -> CacheEntry {
    CacheEntry::new(Method::Get, url, HttpResponse::new(200, body))
  }

  fn exercise(storage: &dyn CacheStorage) {
    assert!(!storage.has_cache("static-v1").unwrap());

    storage.open("static-v1").unwrap();
    assert!(storage.has_cache("static-v1").unwrap());

    storage
      .put_all("static-v1", &[entry("/", "root"), entry("/app.js", "js")])
      .unwrap();
    storage.put("api-v1", &entry("/api/tasks", "[]")).unwrap();

    let hit = storage
      .lookup("static-v1", &request_key(Method::Get, "/app.js"))
      .unwrap()
      .unwrap();
    assert_eq!(hit.response.body, b"js");
    assert!(storage
      .lookup("api-v1", &request_key(Method::Get, "/app.js"))
      .unwrap()
      .is_none());

    assert_eq!(storage.cache_names().unwrap(), vec!["api-v1", "static-v1"]);

    assert!(storage.delete_cache("static-v1").unwrap());
    assert!(!storage.delete_cache("static-v1").unwrap());
    assert!(storage
      .lookup("static-v1", &request_key(Method::Get, "/"))
      .unwrap()
      .is_none());
    assert_eq!(storage.cache_names().unwrap(), vec!["api-v1"]);
  }

  #[test]
  fn test_request_key_depends_on_method_and_url() {
    let get = request_key(Method::Get, "/api/tasks");
    assert_eq!(get, request_key(Method::Get, "/api/tasks"));
    assert_ne!(get, request_key(Method::Post, "/api/tasks"));
    assert_ne!(get, request_key(Method::Get, "/api/tasks?date=2024-05-01"));
    assert_eq!(get.len(), 64);
  }

  #[test]
  fn test_memory_cache_storage() {
    exercise(&MemoryCacheStorage::new());
  }

  #[test]
  fn test_sqlite_cache_storage() {
    let dir = tempfile::tempdir().unwrap();
    exercise(&SqliteCacheStorage::open_at(&dir.path().join("worker-cache.db")).unwrap());
  }

  #[test]
  fn test_sqlite_keeps_headers_and_body() {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteCacheStorage::open_at(&dir.path().join("worker-cache.db")).unwrap();
    let response = HttpResponse::new(200, vec![0u8, 159, 146, 150])
      .with_header("content-type", "application/octet-stream");

    storage
      .put("api-v1", &CacheEntry::new(Method::Get, "/blob", response.clone()))
      .unwrap();

    let hit = storage
      .lookup("api-v1", &request_key(Method::Get, "/blob"))
      .unwrap()
      .unwrap();
    assert_eq!(hit.response, response);
  }
}
