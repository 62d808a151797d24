//! Generation management for the resource store.
//!
//! Generations are immutable and disjoint, so upgrade cleanup is a set
//! difference over names rather than a migration: old data is never touched
//! until the new generation is already fully installed.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::store::{GenerationStore, ResourceStore};

/// Owns creation and deletion of generation stores.
///
/// The current generation's identifier is fixed at construction and compared
/// by exact string equality against all existing generation names.
pub struct GenerationManager {
  store: Arc<dyn ResourceStore>,
  current: String,
}

impl GenerationManager {
  pub fn new(store: Arc<dyn ResourceStore>, current: impl Into<String>) -> Self {
    Self {
      store,
      current: current.into(),
    }
  }

  pub fn current(&self) -> &str {
    &self.current
  }

  /// Whether the current generation is already present in the store.
  pub fn current_exists(&self) -> bool {
    self
      .store
      .list_generations()
      .iter()
      .any(|name| name == &self.current)
  }

  /// All generation names known to the store.
  pub fn list_generations(&self) -> Vec<String> {
    self.store.list_generations()
  }

  /// Open (creating if absent) the current generation's store.
  pub fn ensure_current(&self) -> Result<GenerationStore, StoreError> {
    self.store.open(&self.current)?;
    Ok(GenerationStore::new(
      Arc::clone(&self.store),
      self.current.clone(),
    ))
  }

  /// Delete every generation except the current one.
  ///
  /// Deletions execute independently: a failed delete is logged and skipped,
  /// and the sweep as a whole never fails the activation sequence.
  pub fn collect_garbage(&self) {
    for name in self.store.list_generations() {
      if name == self.current {
        continue;
      }
      match self.store.delete_generation(&name) {
        Ok(()) => info!("Deleted stale generation: {}", name),
        Err(err) => warn!("Failed to delete stale generation {}: {}", name, err),
      }
    }
  }

  /// Best-effort removal of the current generation after a failed install,
  /// so a retry starts from a clean slate.
  pub fn discard_current(&self) {
    if let Err(err) = self.store.delete_generation(&self.current) {
      warn!(
        "Failed to discard generation {} after install failure: {}",
        self.current, err
      );
    }
  }
}
