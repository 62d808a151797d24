//! Generation-scoped resource storage.
//!
//! A store is an opaque key→record mapping with one named record set per
//! generation. Records are immutable once written; re-putting a key
//! overwrites it with a newer record. The only deletion is whole-generation
//! deletion.

mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::error::StoreError;

/// How the origin classified a fetched response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  /// Same-origin response, eligible for caching.
  Basic,
  /// Cross-origin response, never cached.
  Opaque,
}

impl ResponseKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ResponseKind::Basic => "basic",
      ResponseKind::Opaque => "opaque",
    }
  }

  /// Unknown labels read back as opaque so a corrupt row can never become
  /// cacheable.
  pub fn from_label(label: &str) -> Self {
    match label {
      "basic" => ResponseKind::Basic,
      _ => ResponseKind::Opaque,
    }
  }
}

/// One stored resource: a fetched response frozen at store time. Only
/// responses that passed the cacheability check (OK status, same-origin)
/// are ever written, but the kind is kept so a record is self-describing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
  pub stored_at: DateTime<Utc>,
}

/// Storage backend holding one keyed record set per generation.
pub trait ResourceStore: Send + Sync {
  /// Create the named generation if absent. Idempotent.
  fn open(&self, generation: &str) -> Result<(), StoreError>;

  /// Look up a record. Missing keys and backend faults both read as absent.
  fn get(&self, generation: &str, key: &str) -> Option<ResourceRecord>;

  /// Insert or overwrite a record. Last writer for a key wins.
  fn put(&self, generation: &str, key: &str, record: &ResourceRecord) -> Result<(), StoreError>;

  /// All generation names currently present, sorted.
  fn list_generations(&self) -> Vec<String>;

  /// Remove a generation and every record under it. Irreversible.
  fn delete_generation(&self, generation: &str) -> Result<(), StoreError>;
}

/// Handle binding a shared store to a single generation name.
///
/// The retrieval engine only ever holds one of these, so it can read and
/// write the current generation's records but can never touch another
/// generation.
#[derive(Clone)]
pub struct GenerationStore {
  store: Arc<dyn ResourceStore>,
  generation: String,
}

impl GenerationStore {
  pub fn new(store: Arc<dyn ResourceStore>, generation: impl Into<String>) -> Self {
    Self {
      store,
      generation: generation.into(),
    }
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn get(&self, key: &str) -> Option<ResourceRecord> {
    self.store.get(&self.generation, key)
  }

  pub fn put(&self, key: &str, record: &ResourceRecord) -> Result<(), StoreError> {
    self.store.put(&self.generation, key, record)
  }
}

/// In-memory backend for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
  generations: RwLock<HashMap<String, HashMap<String, ResourceRecord>>>,
}

impl ResourceStore for MemoryStore {
  fn open(&self, generation: &str) -> Result<(), StoreError> {
    let mut generations = self
      .generations
      .write()
      .map_err(|_| StoreError::LockPoisoned)?;
    generations.entry(generation.to_string()).or_default();
    Ok(())
  }

  fn get(&self, generation: &str, key: &str) -> Option<ResourceRecord> {
    let generations = self.generations.read().ok()?;
    generations.get(generation)?.get(key).cloned()
  }

  fn put(&self, generation: &str, key: &str, record: &ResourceRecord) -> Result<(), StoreError> {
    let mut generations = self
      .generations
      .write()
      .map_err(|_| StoreError::LockPoisoned)?;
    generations
      .entry(generation.to_string())
      .or_default()
      .insert(key.to_string(), record.clone());
    Ok(())
  }

  fn list_generations(&self) -> Vec<String> {
    match self.generations.read() {
      Ok(generations) => {
        let mut names: Vec<String> = generations.keys().cloned().collect();
        names.sort();
        names
      }
      Err(_) => {
        warn!("Store lock poisoned while listing generations");
        Vec::new()
      }
    }
  }

  fn delete_generation(&self, generation: &str) -> Result<(), StoreError> {
    let mut generations = self
      .generations
      .write()
      .map_err(|_| StoreError::LockPoisoned)?;
    generations.remove(generation);
    Ok(())
  }
}
