//! Shared test doubles and fixtures.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::clients::ClientRegistry;
use crate::error::{StoreError, TransportError};
use crate::store::{
  GenerationStore, MemoryStore, ResourceRecord, ResourceStore, ResponseKind,
};
use crate::transport::{FetchedResource, Transport};

/// A basic (same-origin) record with the given status and body.
pub fn record(status: u16, body: &str) -> ResourceRecord {
  ResourceRecord {
    status,
    content_type: None,
    body: body.as_bytes().to_vec(),
    kind: ResponseKind::Basic,
    stored_at: Utc::now(),
  }
}

/// Open a generation on a memory store and hand back its scoped handle.
pub fn generation_store(store: &Arc<MemoryStore>, generation: &str) -> GenerationStore {
  store.open(generation).unwrap();
  let shared: Arc<dyn ResourceStore> = store.clone();
  GenerationStore::new(shared, generation)
}

/// What a scripted key answers with.
pub enum Script {
  /// 200 same-origin with the given body.
  Ok(&'static str),
  /// Same-origin with the given status and an empty body.
  Status(u16),
  /// 200 but cross-origin.
  Opaque,
  /// Network failure.
  Down,
}

/// Transport answering from a fixed per-key script; unknown keys fail as if
/// the network were down. Counts every fetch.
pub struct ScriptedTransport {
  scripts: HashMap<String, Script>,
  calls: AtomicUsize,
}

impl ScriptedTransport {
  pub fn new() -> Self {
    Self {
      scripts: HashMap::new(),
      calls: AtomicUsize::new(0),
    }
  }

  pub fn on(mut self, key: &str, script: Script) -> Self {
    self.scripts.insert(key.to_string(), script);
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn fetch(&self, key: &str) -> Result<FetchedResource, TransportError> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    match self.scripts.get(key) {
      Some(Script::Ok(body)) => Ok(FetchedResource {
        status: 200,
        content_type: Some("text/plain".to_string()),
        body: body.as_bytes().to_vec(),
        kind: ResponseKind::Basic,
      }),
      Some(Script::Status(status)) => Ok(FetchedResource {
        status: *status,
        content_type: None,
        body: Vec::new(),
        kind: ResponseKind::Basic,
      }),
      Some(Script::Opaque) => Ok(FetchedResource {
        status: 200,
        content_type: None,
        body: Vec::new(),
        kind: ResponseKind::Opaque,
      }),
      Some(Script::Down) | None => Err(TransportError::Network {
        key: key.to_string(),
        reason: "connection refused".to_string(),
      }),
    }
  }
}

/// Store whose writes always fail.
#[derive(Default)]
pub struct WriteFailStore {
  inner: MemoryStore,
}

impl ResourceStore for WriteFailStore {
  fn open(&self, generation: &str) -> Result<(), StoreError> {
    self.inner.open(generation)
  }

  fn get(&self, generation: &str, key: &str) -> Option<ResourceRecord> {
    self.inner.get(generation, key)
  }

  fn put(&self, _generation: &str, _key: &str, _record: &ResourceRecord) -> Result<(), StoreError> {
    Err(StoreError::LockPoisoned)
  }

  fn list_generations(&self) -> Vec<String> {
    self.inner.list_generations()
  }

  fn delete_generation(&self, generation: &str) -> Result<(), StoreError> {
    self.inner.delete_generation(generation)
  }
}

/// Registry that records every claim it receives.
#[derive(Default)]
pub struct RecordingClients {
  claims: Mutex<Vec<String>>,
}

impl RecordingClients {
  pub fn claims(&self) -> Vec<String> {
    self.claims.lock().unwrap().clone()
  }
}

impl ClientRegistry for RecordingClients {
  fn claim_all(&self, generation: &str) {
    self.claims.lock().unwrap().push(generation.to_string());
  }
}
