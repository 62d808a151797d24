//! Client tracking and activation takeover.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::info;

/// Collaborator notified when a new generation takes over in-flight clients.
pub trait ClientRegistry: Send + Sync {
  /// Re-bind every active client to the given generation.
  fn claim_all(&self, generation: &str);
}

/// Tracks which generation each active client is bound to.
///
/// A client binds to whatever generation was current when it connected and
/// keeps that binding until the next activation claims it, so consumers are
/// re-bound transparently instead of reloading.
#[derive(Default)]
pub struct ClientSet {
  bindings: Mutex<HashMap<u64, String>>,
  next_id: AtomicU64,
}

impl ClientSet {
  /// Register a new client bound to the given generation.
  pub fn connect(&self, generation: &str) -> u64 {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self
      .bindings
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(id, generation.to_string());
    id
  }

  pub fn disconnect(&self, id: u64) {
    self
      .bindings
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&id);
  }

  #[cfg(test)]
  pub fn bound_to(&self, id: u64) -> Option<String> {
    self
      .bindings
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&id)
      .cloned()
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self
      .bindings
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  #[cfg(test)]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl ClientRegistry for ClientSet {
  fn claim_all(&self, generation: &str) {
    let mut bindings = self
      .bindings
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    for bound in bindings.values_mut() {
      *bound = generation.to_string();
    }
    info!("Claimed {} clients for generation {}", bindings.len(), generation);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_clients_bind_to_the_generation_at_connect_time() {
    let clients = ClientSet::default();
    let a = clients.connect("g0");
    let b = clients.connect("g1");

    assert_eq!(clients.bound_to(a).as_deref(), Some("g0"));
    assert_eq!(clients.bound_to(b).as_deref(), Some("g1"));
  }

  #[test]
  fn test_claim_all_rebinds_every_client() {
    let clients = ClientSet::default();
    let a = clients.connect("g0");
    let b = clients.connect("g0");

    clients.claim_all("g1");

    assert_eq!(clients.bound_to(a).as_deref(), Some("g1"));
    assert_eq!(clients.bound_to(b).as_deref(), Some("g1"));
  }

  #[test]
  fn test_disconnect_removes_the_binding() {
    let clients = ClientSet::default();
    let a = clients.connect("g0");
    assert_eq!(clients.len(), 1);

    clients.disconnect(a);

    assert!(clients.is_empty());
    assert!(clients.bound_to(a).is_none());
  }
}
