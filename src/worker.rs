//! Single-worker event dispatch.
//!
//! One logical worker owns the lifecycle and processes events in order, so
//! install/activate sequences are exclusive. Fetches are spawned onto their
//! own tasks, so any number of requests can be in flight concurrently.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::engine::{Resolved, RetrievalEngine};
use crate::error::{FetchError, InstallError};
use crate::lifecycle::{LifecycleController, LifecycleState, StatusReport};
use crate::transport::Transport;

/// Commands accepted over the control channel.
#[derive(Debug)]
pub enum ControlCommand {
  /// Activate immediately instead of waiting for client turnover.
  SkipWaiting,
  /// Report the current generation and lifecycle state.
  Report(oneshot::Sender<StatusReport>),
}

/// Events the worker dispatches on.
pub enum WorkerEvent {
  Install {
    reply: oneshot::Sender<Result<(), InstallError>>,
  },
  Activate,
  Fetch {
    key: String,
    reply: oneshot::Sender<Result<Resolved, FetchError>>,
  },
  Control(ControlCommand),
}

/// The single logical worker driving one lifecycle and the live engine.
pub struct Worker {
  lifecycle: LifecycleController,
  engine: Option<RetrievalEngine>,
  transport: Arc<dyn Transport>,
  shell_key: String,
}

impl Worker {
  pub fn new(
    lifecycle: LifecycleController,
    transport: Arc<dyn Transport>,
    shell_key: impl Into<String>,
  ) -> Self {
    Self {
      lifecycle,
      engine: None,
      transport,
      shell_key: shell_key.into(),
    }
  }

  /// Drain the event channel until every sender is gone.
  pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = rx.recv().await {
      self.dispatch(event).await;
    }
  }

  async fn dispatch(&mut self, event: WorkerEvent) {
    match event {
      WorkerEvent::Install { reply } => {
        let result = self.lifecycle.install().await;
        let succeeded = result.is_ok();
        let _ = reply.send(result);
        if succeeded && self.lifecycle.skip_waiting_requested() {
          self.activate();
        }
      }

      WorkerEvent::Activate => self.activate(),

      WorkerEvent::Fetch { key, reply } => match &self.engine {
        Some(engine) => {
          let engine = engine.clone();
          tokio::spawn(async move {
            let result = engine.resolve(&key).await;
            // The caller may have gone away; the background store write is
            // an independent task and unaffected.
            let _ = reply.send(result);
          });
        }
        None => {
          // Nothing is active yet, so the request is not ours to intercept.
          warn!("Fetch for {} before activation, passing through", key);
          let _ = reply.send(Ok(Resolved::PassThrough));
        }
      },

      WorkerEvent::Control(ControlCommand::SkipWaiting) => {
        self.lifecycle.skip_waiting();
        if self.lifecycle.state() == LifecycleState::Installed {
          self.activate();
        }
      }

      WorkerEvent::Control(ControlCommand::Report(reply)) => {
        let _ = reply.send(self.lifecycle.status());
      }
    }
  }

  fn activate(&mut self) {
    if let Some(store) = self.lifecycle.activate() {
      self.engine = Some(RetrievalEngine::new(
        store,
        Arc::clone(&self.transport),
        self.shell_key.clone(),
      ));
    }
  }
}

/// Cheap cloneable handle for submitting work to a spawned worker.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
}

/// Spawn the worker's run loop and return a handle to it.
pub fn spawn(worker: Worker) -> WorkerHandle {
  let (tx, rx) = mpsc::unbounded_channel();
  tokio::spawn(worker.run(rx));
  WorkerHandle { tx }
}

impl WorkerHandle {
  pub async fn install(&self) -> color_eyre::Result<()> {
    let (tx, rx) = oneshot::channel();
    self.send(WorkerEvent::Install { reply: tx })?;
    rx.await
      .map_err(|_| color_eyre::eyre::eyre!("Worker dropped the install reply"))??;
    Ok(())
  }

  pub fn activate(&self) -> color_eyre::Result<()> {
    self.send(WorkerEvent::Activate)
  }

  pub fn skip_waiting(&self) -> color_eyre::Result<()> {
    self.send(WorkerEvent::Control(ControlCommand::SkipWaiting))
  }

  pub async fn fetch(&self, key: &str) -> color_eyre::Result<Resolved> {
    let (tx, rx) = oneshot::channel();
    self.send(WorkerEvent::Fetch {
      key: key.to_string(),
      reply: tx,
    })?;
    let resolved = rx
      .await
      .map_err(|_| color_eyre::eyre::eyre!("Worker dropped the fetch reply"))??;
    Ok(resolved)
  }

  pub async fn status(&self) -> color_eyre::Result<StatusReport> {
    let (tx, rx) = oneshot::channel();
    self.send(WorkerEvent::Control(ControlCommand::Report(tx)))?;
    let report = rx
      .await
      .map_err(|_| color_eyre::eyre::eyre!("Worker dropped the status reply"))?;
    Ok(report)
  }

  fn send(&self, event: WorkerEvent) -> color_eyre::Result<()> {
    self
      .tx
      .send(event)
      .map_err(|_| color_eyre::eyre::eyre!("Worker is no longer running"))
  }
}
