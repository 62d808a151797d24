//! SQLite-backed resource store.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use super::{ResourceRecord, ResourceStore, ResponseKind};
use crate::error::StoreError;

/// Schema for the resource store.
///
/// The `generations` table is the registry `list_generations` reads, so a
/// generation exists as soon as it is opened, even before any record lands.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS resources (
    generation TEXT NOT NULL,
    resource_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    kind TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (generation, resource_key)
);

CREATE INDEX IF NOT EXISTS idx_resources_generation ON resources(generation);
"#;

/// SQLite-backed implementation of [`ResourceStore`].
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the default location.
  pub fn open_default() -> Result<Self, StoreError> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the store at the given path.
  pub fn open_at(path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-process store backed by an in-memory database.
  #[cfg(test)]
  pub fn in_memory() -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory()?;
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Default database path under the platform data directory.
  fn default_path() -> Result<PathBuf, StoreError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(StoreError::NoDataDir)?;

    Ok(data_dir.join("offcache").join("store.db"))
  }

  fn run_migrations(&self) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    conn.execute_batch(STORE_SCHEMA)?;
    Ok(())
  }

  fn try_get(&self, generation: &str, key: &str) -> Result<Option<ResourceRecord>, StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

    let mut stmt = conn.prepare(
      "SELECT status, content_type, body, kind, stored_at FROM resources
       WHERE generation = ? AND resource_key = ?",
    )?;

    let row: Option<(i64, Option<String>, Vec<u8>, String, String)> = match stmt
      .query_row(params![generation, key], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
        ))
      }) {
      Ok(row) => Some(row),
      Err(rusqlite::Error::QueryReturnedNoRows) => None,
      Err(err) => return Err(err.into()),
    };

    let (status, content_type, body, kind, stored_at) = match row {
      Some(row) => row,
      None => return Ok(None),
    };

    Ok(Some(ResourceRecord {
      status: status as u16,
      content_type,
      body,
      kind: ResponseKind::from_label(&kind),
      stored_at: parse_stored_at(&stored_at)?,
    }))
  }
}

impl ResourceStore for SqliteStore {
  fn open(&self, generation: &str) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    conn.execute(
      "INSERT OR IGNORE INTO generations (name) VALUES (?)",
      params![generation],
    )?;
    Ok(())
  }

  fn get(&self, generation: &str, key: &str) -> Option<ResourceRecord> {
    match self.try_get(generation, key) {
      Ok(record) => record,
      Err(err) => {
        warn!("Store read failed for {}: {}", key, err);
        None
      }
    }
  }

  fn put(&self, generation: &str, key: &str, record: &ResourceRecord) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

    // Keep the registry consistent even for writes that race an open.
    conn.execute(
      "INSERT OR IGNORE INTO generations (name) VALUES (?)",
      params![generation],
    )?;

    conn.execute(
      "INSERT OR REPLACE INTO resources
         (generation, resource_key, status, content_type, body, kind, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        generation,
        key,
        record.status as i64,
        record.content_type,
        record.body,
        record.kind.as_str(),
        record.stored_at.to_rfc3339(),
      ],
    )?;

    Ok(())
  }

  fn list_generations(&self) -> Vec<String> {
    let conn = match self.conn.lock() {
      Ok(conn) => conn,
      Err(_) => {
        warn!("Store lock poisoned while listing generations");
        return Vec::new();
      }
    };

    let mut stmt = match conn.prepare("SELECT name FROM generations ORDER BY name") {
      Ok(stmt) => stmt,
      Err(err) => {
        warn!("Failed to list generations: {}", err);
        return Vec::new();
      }
    };

    let names = match stmt.query_map([], |row| row.get::<_, String>(0)) {
      Ok(rows) => rows.filter_map(|r| r.ok()).collect(),
      Err(err) => {
        warn!("Failed to list generations: {}", err);
        Vec::new()
      }
    };
    names
  }

  fn delete_generation(&self, generation: &str) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    conn.execute(
      "DELETE FROM resources WHERE generation = ?",
      params![generation],
    )?;
    conn.execute(
      "DELETE FROM generations WHERE name = ?",
      params![generation],
    )?;
    Ok(())
  }
}

/// Parse a stored_at column written as RFC 3339.
fn parse_stored_at(s: &str) -> Result<DateTime<Utc>, StoreError> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|_| StoreError::BadTimestamp(s.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testutil::record;

  #[test]
  fn test_round_trips_a_record() {
    let store = SqliteStore::in_memory().unwrap();
    store.open("g1").unwrap();

    let mut original = record(200, "body-bytes");
    original.content_type = Some("text/html".to_string());
    store.put("g1", "/", &original).unwrap();

    let read = store.get("g1", "/").unwrap();
    assert_eq!(read.status, 200);
    assert_eq!(read.content_type.as_deref(), Some("text/html"));
    assert_eq!(read.body, b"body-bytes");
    assert_eq!(read.kind, ResponseKind::Basic);
  }

  #[test]
  fn test_overwrite_replaces_record() {
    let store = SqliteStore::in_memory().unwrap();
    store.open("g1").unwrap();
    store.put("g1", "/app.js", &record(200, "r1")).unwrap();
    store.put("g1", "/app.js", &record(200, "r2")).unwrap();

    assert_eq!(store.get("g1", "/app.js").unwrap().body, b"r2");
  }

  #[test]
  fn test_lists_generations_sorted() {
    let store = SqliteStore::in_memory().unwrap();
    for name in ["v3", "v1", "v2"] {
      store.open(name).unwrap();
    }

    assert_eq!(
      store.list_generations(),
      vec!["v1".to_string(), "v2".to_string(), "v3".to_string()]
    );
  }

  #[test]
  fn test_open_registers_empty_generation() {
    let store = SqliteStore::in_memory().unwrap();
    store.open("g1").unwrap();
    store.open("g1").unwrap();

    assert_eq!(store.list_generations(), vec!["g1".to_string()]);
  }

  #[test]
  fn test_delete_generation_is_complete_and_isolated() {
    let store = SqliteStore::in_memory().unwrap();
    store.open("g0").unwrap();
    store.put("g0", "/", &record(200, "old")).unwrap();
    store.open("g1").unwrap();
    store.put("g1", "/", &record(200, "new")).unwrap();

    store.delete_generation("g0").unwrap();

    assert!(store.get("g0", "/").is_none());
    assert_eq!(store.get("g1", "/").unwrap().body, b"new");
    assert_eq!(store.list_generations(), vec!["g1".to_string()]);
  }

  #[test]
  fn test_unknown_kind_label_reads_as_opaque() {
    assert_eq!(ResponseKind::from_label("basic"), ResponseKind::Basic);
    assert_eq!(ResponseKind::from_label("cors"), ResponseKind::Opaque);
  }
}
