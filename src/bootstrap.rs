//! All-or-nothing population of a fresh generation.

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::InstallError;
use crate::store::GenerationStore;
use crate::transport::Transport;

/// The ordered list of resource keys required for offline operation.
///
/// Read once at install time and never mutated. The first entry is the shell
/// resource by convention (the application's entry page).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
  keys: Vec<String>,
}

impl Manifest {
  /// Production manifests come from the deploy-time config; building one in
  /// code is only needed by tests.
  #[cfg(test)]
  pub fn new(keys: Vec<String>) -> Self {
    Self { keys }
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.keys.iter().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.keys.len()
  }

  pub fn is_empty(&self) -> bool {
    self.keys.is_empty()
  }

  /// The root/index entry served when both cache and network fail.
  pub fn shell(&self) -> Option<&str> {
    self.keys.first().map(String::as_str)
  }
}

/// Whether every manifest resource is present in the store.
///
/// This is the completion check for a generation: a failed install can leave
/// a registered generation with a partial record set (when both a write and
/// the follow-up discard fail), so bare registry presence is not proof that
/// bootstrap ever finished.
pub fn is_populated(store: &GenerationStore, manifest: &Manifest) -> bool {
  manifest.keys().all(|key| store.get(key).is_some())
}

/// Fetch every manifest key and write all of them as a single logical unit.
///
/// Any fetch failure, or a non-cacheable response for a mandatory resource,
/// aborts before the first write, so a failed install leaves no committed
/// records and is safe to retry. The caller must not activate the generation
/// on failure.
pub async fn populate(
  store: &GenerationStore,
  manifest: &Manifest,
  transport: &dyn Transport,
) -> Result<(), InstallError> {
  let mut fetched = Vec::with_capacity(manifest.len());

  for key in manifest.keys() {
    debug!("Fetching manifest resource: {}", key);
    let resource = transport
      .fetch(key)
      .await
      .map_err(|source| InstallError::ManifestFetch {
        key: key.to_string(),
        source,
      })?;

    if !resource.cacheable() {
      return Err(InstallError::NotCacheable {
        key: key.to_string(),
        status: resource.status,
      });
    }

    fetched.push((key.to_string(), resource.into_record()));
  }

  // Every fetch succeeded; only now does anything touch the store.
  for (key, record) in &fetched {
    store
      .put(key, record)
      .map_err(|source| InstallError::StoreWrite {
        key: key.clone(),
        source,
      })?;
  }

  info!(
    "Cached {} manifest resources for generation {}",
    fetched.len(),
    store.generation()
  );

  Ok(())
}
