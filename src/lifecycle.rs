//! Install/activate orchestration for one generation.
//!
//! Side effects are strictly ordered: garbage collection never runs before
//! population succeeds, and client takeover never runs before garbage
//! collection completes.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::bootstrap::{self, Manifest};
use crate::clients::ClientRegistry;
use crate::error::InstallError;
use crate::generation::GenerationManager;
use crate::store::GenerationStore;
use crate::transport::Transport;

/// Lifecycle of the configured generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
  Idle,
  Installing,
  Installed,
  InstallFailed,
  Activating,
  Active,
}

/// Snapshot answered over the control channel.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
  /// The configured (current) generation identifier.
  pub generation: String,
  pub state: LifecycleState,
  /// The generation serving requests, once steady state is reached.
  pub active_generation: Option<String>,
  /// Whether the current generation is present in the store.
  pub installed: bool,
  /// Every generation the store knows about.
  pub generations: Vec<String>,
}

/// Drives `Installing → Installed → Activating → Active`, with the error
/// edge `Installing → InstallFailed` (terminal, no generation switch).
///
/// Transitions are exclusive: a single worker runs one lifecycle sequence at
/// a time.
pub struct LifecycleController {
  manager: GenerationManager,
  manifest: Manifest,
  transport: Arc<dyn Transport>,
  clients: Arc<dyn ClientRegistry>,
  state: LifecycleState,
  skip_waiting: bool,
  current_store: Option<GenerationStore>,
}

impl LifecycleController {
  pub fn new(
    manager: GenerationManager,
    manifest: Manifest,
    transport: Arc<dyn Transport>,
    clients: Arc<dyn ClientRegistry>,
  ) -> Self {
    Self {
      manager,
      manifest,
      transport,
      clients,
      state: LifecycleState::Idle,
      skip_waiting: false,
      current_store: None,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  /// The active generation identifier, once steady state is reached.
  pub fn active_generation(&self) -> Option<&str> {
    (self.state == LifecycleState::Active).then(|| self.manager.current())
  }

  /// Request activation without waiting for natural client turnover.
  pub fn skip_waiting(&mut self) {
    self.skip_waiting = true;
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting
  }

  pub fn status(&self) -> StatusReport {
    StatusReport {
      generation: self.manager.current().to_string(),
      state: self.state,
      active_generation: self.active_generation().map(String::from),
      installed: self.manager.current_exists(),
      generations: self.manager.list_generations(),
    }
  }

  /// Run the install sequence: bootstrap the manifest into the current
  /// generation's store.
  ///
  /// Idempotent: re-installing a generation whose manifest is already fully
  /// present in the store is a no-op with the same outcome. On failure the
  /// previous generation remains current, the fresh generation is discarded,
  /// and the install is safe to retry.
  pub async fn install(&mut self) -> Result<(), InstallError> {
    match self.state {
      LifecycleState::Installed | LifecycleState::Activating | LifecycleState::Active => {
        debug!(
          "Generation {} already installed, ignoring install",
          self.manager.current()
        );
        return Ok(());
      }
      _ => {}
    }

    self.state = LifecycleState::Installing;

    let existed = self.manager.current_exists();
    let store = match self.manager.ensure_current() {
      Ok(store) => store,
      Err(source) => {
        self.state = LifecycleState::InstallFailed;
        return Err(InstallError::StoreOpen { source });
      }
    };

    if existed {
      // Registry presence alone is not enough: a failed install whose
      // discard also failed leaves a partial record set behind, and resuming
      // it would let an incomplete generation activate.
      if bootstrap::is_populated(&store, &self.manifest) {
        info!(
          "Generation {} already fully populated, resuming without bootstrap",
          self.manager.current()
        );
        self.current_store = Some(store);
        self.state = LifecycleState::Installed;
        return Ok(());
      }
      warn!(
        "Generation {} is missing manifest resources, re-running bootstrap",
        self.manager.current()
      );
    }

    info!("Installing generation {}", self.manager.current());

    match bootstrap::populate(&store, &self.manifest, self.transport.as_ref()).await {
      Ok(()) => {
        self.current_store = Some(store);
        self.state = LifecycleState::Installed;
        info!("Install complete for generation {}", self.manager.current());
        Ok(())
      }
      Err(err) => {
        error!(
          "Install failed for generation {}: {}",
          self.manager.current(),
          err
        );
        self.manager.discard_current();
        self.state = LifecycleState::InstallFailed;
        Err(err)
      }
    }
  }

  /// Run the activation sequence: collect stale generations, then claim all
  /// clients so in-flight consumers re-bind to the current generation.
  ///
  /// Cleanup is best-effort; activation from `Installed` always reaches
  /// `Active`. Returns the current generation's store handle.
  pub fn activate(&mut self) -> Option<GenerationStore> {
    match self.state {
      LifecycleState::Active => return self.current_store.clone(),
      LifecycleState::Installed => {}
      _ => {
        warn!("Ignoring activation from state {:?}", self.state);
        return None;
      }
    }

    self.state = LifecycleState::Activating;
    info!("Activating generation {}", self.manager.current());

    self.manager.collect_garbage();
    self.clients.claim_all(self.manager.current());

    self.state = LifecycleState::Active;
    info!("Generation {} is active", self.manager.current());

    self.current_store.clone()
  }
}
