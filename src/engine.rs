//! Cache-first retrieval with network fallback and offline shell.

use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::error::FetchError;
use crate::store::{GenerationStore, ResourceRecord};
use crate::transport::Transport;

/// Terminal state of one resolved request.
#[derive(Debug, Clone)]
pub enum Resolved {
  /// Key outside the interceptable namespace; the caller handles it.
  PassThrough,
  /// Served from the current generation's store. No network access occurred.
  CacheHit(ResourceRecord),
  /// Served from the origin and written back to the store.
  NetworkHit(ResourceRecord),
  /// Served from the origin but not eligible for caching.
  NetworkHitUncached(ResourceRecord),
  /// Origin unreachable; served the manifest shell instead.
  OfflineFallback(ResourceRecord),
}

impl Resolved {
  pub fn record(&self) -> Option<&ResourceRecord> {
    match self {
      Resolved::PassThrough => None,
      Resolved::CacheHit(r)
      | Resolved::NetworkHit(r)
      | Resolved::NetworkHitUncached(r)
      | Resolved::OfflineFallback(r) => Some(r),
    }
  }

  pub fn source(&self) -> &'static str {
    match self {
      Resolved::PassThrough => "passthrough",
      Resolved::CacheHit(_) => "cache",
      Resolved::NetworkHit(_) => "network",
      Resolved::NetworkHitUncached(_) => "network-uncached",
      Resolved::OfflineFallback(_) => "offline-fallback",
    }
  }
}

/// Per-request decision engine.
///
/// Deliberately cache-first, not cache-aside: a stored key answers instantly
/// and never touches the network, trading staleness risk for offline
/// availability.
#[derive(Clone)]
pub struct RetrievalEngine {
  store: GenerationStore,
  transport: Arc<dyn Transport>,
  shell_key: String,
}

impl RetrievalEngine {
  pub fn new(
    store: GenerationStore,
    transport: Arc<dyn Transport>,
    shell_key: impl Into<String>,
  ) -> Self {
    Self {
      store,
      transport,
      shell_key: shell_key.into(),
    }
  }

  /// Resolve one request.
  ///
  /// The cache probe strictly precedes any network attempt. Every path
  /// terminates: in a record, a passthrough, or `FallbackUnavailable`.
  pub async fn resolve(&self, key: &str) -> Result<Resolved, FetchError> {
    if !self.intercepts(key) {
      debug!("Passing through non-interceptable key: {}", key);
      return Ok(Resolved::PassThrough);
    }

    if let Some(record) = self.store.get(key) {
      debug!("Cache hit: {}", key);
      return Ok(Resolved::CacheHit(record));
    }

    debug!("Cache miss, fetching from origin: {}", key);
    match self.transport.fetch(key).await {
      Ok(resource) => {
        if resource.cacheable() {
          let record = resource.into_record();
          self.spawn_store_write(key.to_string(), record.clone());
          Ok(Resolved::NetworkHit(record))
        } else {
          debug!(
            "Not caching {} (status {}, {:?})",
            key, resource.status, resource.kind
          );
          Ok(Resolved::NetworkHitUncached(resource.into_record()))
        }
      }
      Err(err) => {
        warn!("Origin fetch failed for {}: {}", key, err);
        match self.store.get(&self.shell_key) {
          Some(shell) => Ok(Resolved::OfflineFallback(shell)),
          None => Err(FetchError::FallbackUnavailable { source: err }),
        }
      }
    }
  }

  /// Absolute keys with a scheme other than http/https belong to an
  /// unrelated namespace and are never intercepted. Relative keys resolve
  /// against the origin and are always ours.
  fn intercepts(&self, key: &str) -> bool {
    match Url::parse(key) {
      Ok(url) => matches!(url.scheme(), "http" | "https"),
      Err(_) => true,
    }
  }

  /// One copy of the network result goes to the store on its own task. The
  /// caller-facing copy is independent, so an abandoned caller cannot cancel
  /// this write, and a failed write is logged but never surfaced.
  fn spawn_store_write(&self, key: String, record: ResourceRecord) {
    let store = self.store.clone();
    tokio::spawn(async move {
      if let Err(err) = store.put(&key, &record) {
        warn!("Background store write failed for {}: {}", key, err);
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::{MemoryStore, ResponseKind};
  use crate::testutil::{generation_store, record, Script, ScriptedTransport};
  use std::time::Duration;

  fn engine_with(
    transport: ScriptedTransport,
  ) -> (RetrievalEngine, GenerationStore, Arc<ScriptedTransport>) {
    let backing = Arc::new(MemoryStore::default());
    let store = generation_store(&backing, "g1");
    let transport = Arc::new(transport);
    let engine = RetrievalEngine::new(store.clone(), transport.clone(), "/");
    (engine, store, transport)
  }

  #[tokio::test]
  async fn test_cache_hit_never_touches_the_network() {
    let (engine, store, transport) = engine_with(ScriptedTransport::new());
    store.put("/app.js", &record(200, "cached")).unwrap();

    let resolved = engine.resolve("/app.js").await.unwrap();

    assert!(matches!(resolved, Resolved::CacheHit(_)));
    assert_eq!(resolved.record().unwrap().body, b"cached");
    assert_eq!(transport.calls(), 0);
  }

  #[tokio::test]
  async fn test_network_hit_is_written_back() {
    let (engine, store, _) =
      engine_with(ScriptedTransport::new().on("/app.js", Script::Ok("fresh")));

    let resolved = engine.resolve("/app.js").await.unwrap();
    assert!(matches!(resolved, Resolved::NetworkHit(_)));

    // The write-back runs on its own task.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.get("/app.js").unwrap().body, b"fresh");
  }

  #[tokio::test]
  async fn test_error_status_is_returned_but_never_cached() {
    let (engine, store, _) =
      engine_with(ScriptedTransport::new().on("/missing", Script::Status(404)));

    let resolved = engine.resolve("/missing").await.unwrap();
    assert!(matches!(resolved, Resolved::NetworkHitUncached(_)));
    assert_eq!(resolved.record().unwrap().status, 404);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(store.get("/missing").is_none());
  }

  #[tokio::test]
  async fn test_opaque_response_is_returned_but_never_cached() {
    let (engine, store, _) = engine_with(ScriptedTransport::new().on("/cdn.js", Script::Opaque));

    let resolved = engine.resolve("/cdn.js").await.unwrap();
    assert!(matches!(resolved, Resolved::NetworkHitUncached(_)));
    assert_eq!(resolved.record().unwrap().kind, ResponseKind::Opaque);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(store.get("/cdn.js").is_none());
  }

  #[tokio::test]
  async fn test_network_failure_falls_back_to_the_shell() {
    let (engine, store, _) = engine_with(ScriptedTransport::new());
    store.put("/", &record(200, "shell")).unwrap();

    let resolved = engine.resolve("/missing").await.unwrap();

    assert!(matches!(resolved, Resolved::OfflineFallback(_)));
    assert_eq!(resolved.record().unwrap().body, b"shell");
  }

  #[tokio::test]
  async fn test_network_failure_without_shell_surfaces_the_error() {
    let (engine, _, _) = engine_with(ScriptedTransport::new());

    let err = engine.resolve("/missing").await.unwrap_err();

    assert!(matches!(err, FetchError::FallbackUnavailable { .. }));
  }

  #[tokio::test]
  async fn test_foreign_scheme_passes_through_untouched() {
    let (engine, store, transport) = engine_with(ScriptedTransport::new());

    let resolved = engine
      .resolve("chrome-extension://abcdef/script.js")
      .await
      .unwrap();

    assert!(matches!(resolved, Resolved::PassThrough));
    assert!(resolved.record().is_none());
    assert_eq!(transport.calls(), 0);
    assert!(store.get("chrome-extension://abcdef/script.js").is_none());
  }

  #[tokio::test]
  async fn test_absolute_http_keys_are_intercepted() {
    let (engine, store, _) = engine_with(
      ScriptedTransport::new().on("https://example.com/app.js", Script::Ok("fresh")),
    );

    let resolved = engine.resolve("https://example.com/app.js").await.unwrap();
    assert!(matches!(resolved, Resolved::NetworkHit(_)));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(store.get("https://example.com/app.js").is_some());
  }
}
