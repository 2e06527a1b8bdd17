//! Cache storage trait with SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{CacheKey, CachedResponse};
use crate::http::Response;

/// Trait for cache storage backends.
///
/// A backend holds any number of named generations. Every write replaces the
/// whole entry for its key; there are no partial updates.
pub trait CacheStorage: Send + Sync + 'static {
  /// Names of every generation present, sorted.
  fn generation_names(&self) -> Result<Vec<String>>;

  /// Create a generation if it does not exist yet.
  fn open_generation(&self, name: &str) -> Result<()>;

  /// Delete a generation and all of its entries. Returns whether it existed.
  fn delete_generation(&self, name: &str) -> Result<bool>;

  /// Look up a single entry.
  fn get(&self, generation: &str, key: &CacheKey) -> Result<Option<CachedResponse>>;

  /// Store a single entry, creating the generation if needed.
  fn put(&self, generation: &str, key: &CacheKey, response: &Response) -> Result<()>;

  /// Store a batch of entries. Either all of them are written or none is.
  fn put_all(&self, generation: &str, entries: &[(CacheKey, Response)]) -> Result<()>;

  /// Number of entries in a generation (0 if it does not exist).
  fn entry_count(&self, generation: &str) -> Result<usize>;
}

/// In-memory storage. Used by tests and by dry runs that should not touch
/// the on-disk cache.
#[derive(Default)]
pub struct MemoryStorage {
  generations: Mutex<BTreeMap<String, HashMap<String, CachedResponse>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, HashMap<String, CachedResponse>>>> {
    self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn generation_names(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.keys().cloned().collect())
  }

  fn open_generation(&self, name: &str) -> Result<()> {
    self.lock()?.entry(name.to_string()).or_default();
    Ok(())
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    Ok(self.lock()?.remove(name).is_some())
  }

  fn get(&self, generation: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    Ok(
      self
        .lock()?
        .get(generation)
        .and_then(|entries| entries.get(&key.hash))
        .cloned(),
    )
  }

  fn put(&self, generation: &str, key: &CacheKey, response: &Response) -> Result<()> {
    self.put_all(generation, &[(key.clone(), response.clone())])
  }

  fn put_all(&self, generation: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    let mut generations = self.lock()?;
    let store = generations.entry(generation.to_string()).or_default();
    let cached_at = Utc::now();
    for (key, response) in entries {
      store.insert(
        key.hash.clone(),
        CachedResponse {
          response: response.clone(),
          cached_at,
        },
      );
    }
    Ok(())
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    Ok(self.lock()?.get(generation).map(HashMap::len).unwrap_or(0))
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at the given path, or at the
  /// default location when no path is given.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellcache").join("cache.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per named cache generation
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by request hash within a generation
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    identity TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_entries_generation ON entries(generation);
"#;

fn insert_entry(conn: &Connection, generation: &str, key: &CacheKey, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries (generation, entry_key, identity, url, status, status_text, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        key.hash,
        key.identity,
        response.url,
        response.status,
        response.status_text,
        headers,
        response.body.as_ref(),
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key.identity, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn generation_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read generation name: {}", e))?;

    Ok(names)
  }

  fn open_generation(&self, name: &str) -> Result<()> {
    self
      .lock()?
      .execute(
        "INSERT OR IGNORE INTO generations (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open generation {}: {}", name, e))?;
    Ok(())
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE generation = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM generations WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn get(&self, generation: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT url, status, status_text, headers, body, cached_at FROM entries
         WHERE generation = ? AND entry_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, u16, String, String, Vec<u8>, String)> = stmt
      .query_row(params![generation, key.hash], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read entry {}: {}", key.identity, e))?;

    match row {
      Some((url, status, status_text, headers, body, cached_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key.identity, e))?;
        Ok(Some(CachedResponse {
          response: Response {
            url,
            status,
            status_text,
            headers,
            body: body.into(),
          },
          cached_at: parse_datetime(&cached_at_str)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, generation: &str, key: &CacheKey, response: &Response) -> Result<()> {
    self.put_all(generation, std::slice::from_ref(&(key.clone(), response.clone())))
  }

  fn put_all(&self, generation: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO generations (name) VALUES (?)",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to open generation {}: {}", generation, e))?;

    for (key, response) in entries {
      insert_entry(&tx, generation, key, response)?;
    }

    // Dropping the transaction without committing rolls everything back
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    let count: i64 = self
      .lock()?
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", generation, e))?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
