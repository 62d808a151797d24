//! Error taxonomy for the caching engine.
//!
//! Store and transport failures are contained at the component that produced
//! them; only an install failure or a missing offline fallback is allowed to
//! change externally observable behavior.

use thiserror::Error;

/// A store open/put/delete failed. Non-fatal outside of install: callers log
/// it and treat the operation as a no-op.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("store i/o error: {0}")]
  Io(#[from] std::io::Error),

  #[error("store lock poisoned")]
  LockPoisoned,

  #[error("could not determine data directory")]
  NoDataDir,

  #[error("invalid stored_at timestamp: {0}")]
  BadTimestamp(String),
}

/// The origin could not be reached or the key could not be resolved
/// against it.
#[derive(Debug, Error)]
pub enum TransportError {
  #[error("origin unreachable for {key}: {reason}")]
  Network { key: String, reason: String },

  #[error("invalid resource key {key}: {reason}")]
  InvalidKey { key: String, reason: String },
}

/// Install (manifest population) failed. Fatal to the install sequence: the
/// generation does not become current. Safe to retry.
#[derive(Debug, Error)]
pub enum InstallError {
  #[error("failed to open generation store: {source}")]
  StoreOpen {
    #[source]
    source: StoreError,
  },

  #[error("manifest resource {key} could not be fetched: {source}")]
  ManifestFetch {
    key: String,
    #[source]
    source: TransportError,
  },

  #[error("manifest resource {key} is not cacheable (status {status})")]
  NotCacheable { key: String, status: u16 },

  #[error("failed to write manifest resource {key}: {source}")]
  StoreWrite {
    key: String,
    #[source]
    source: StoreError,
  },
}

/// A live request could not be satisfied from cache, network, or the
/// offline shell.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("origin unreachable and no offline fallback is cached: {source}")]
  FallbackUnavailable {
    #[source]
    source: TransportError,
  },
}
