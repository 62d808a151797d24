mod bootstrap;
mod clients;
mod config;
mod engine;
mod error;
mod generation;
mod lifecycle;
mod store;
#[cfg(test)]
mod testutil;
mod transport;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::clients::{ClientRegistry, ClientSet};
use crate::config::Config;
use crate::generation::GenerationManager;
use crate::lifecycle::LifecycleController;
use crate::store::{MemoryStore, ResourceStore, SqliteStore};
use crate::transport::{HttpTransport, Transport};
use crate::worker::{Worker, WorkerHandle};

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "Offline-first caching intermediary for HTTP resources")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured generation and activate it
  Install,
  /// Resolve a resource through the cache and print its body
  Get {
    /// Resource key, relative to the origin (e.g. "/index.html")
    key: String,
  },
  /// Report the current generation and lifecycle state
  Status {
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _log_guard = init_tracing()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let (handle, clients) = start_worker(&config)?;

  match args.command {
    Command::Install => {
      handle.install().await?;
      handle.activate()?;
      let status = handle.status().await?;
      match status.active_generation {
        Some(generation) => println!("Active generation: {}", generation),
        None => println!("Generation {} installed but not active", status.generation),
      }
    }

    Command::Get { key } => {
      // Installing an already present generation is a no-op, so this only
      // hits the network on the very first run.
      handle.install().await?;
      handle.activate()?;

      // This session is a client of whatever generation is live.
      let status = handle.status().await?;
      let client = clients.connect(
        status
          .active_generation
          .as_deref()
          .unwrap_or(&status.generation),
      );

      let resolved = handle.fetch(&key).await?;
      match resolved.record() {
        Some(record) => {
          eprintln!("[{}] status {}", resolved.source(), record.status);
          std::io::stdout().write_all(&record.body)?;
        }
        None => eprintln!("{} is outside the cached namespace", key),
      }

      clients.disconnect(client);
    }

    Command::Status { json } => {
      let status = handle.status().await?;
      if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
      } else {
        println!("generation: {}", status.generation);
        println!("state: {:?}", status.state);
        println!(
          "active: {}",
          status.active_generation.as_deref().unwrap_or("none")
        );
        println!("installed: {}", status.installed);
        println!("store generations: {}", status.generations.join(", "));
      }
    }
  }

  Ok(())
}

/// Wire the store, transport, and lifecycle together and spawn the worker.
fn start_worker(config: &Config) -> Result<(WorkerHandle, Arc<ClientSet>)> {
  let origin = url::Url::parse(&config.origin)
    .map_err(|e| eyre!("Invalid origin URL {}: {}", config.origin, e))?;

  let store: Arc<dyn ResourceStore> = if config.ephemeral {
    Arc::new(MemoryStore::default())
  } else {
    Arc::new(match &config.store_path {
      Some(path) => SqliteStore::open_at(path)?,
      None => SqliteStore::open_default()?,
    })
  };

  let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(origin));
  let clients = Arc::new(ClientSet::default());
  let registry: Arc<dyn ClientRegistry> = clients.clone();

  let manager = GenerationManager::new(store, config.generation.clone());
  let mut lifecycle = LifecycleController::new(
    manager,
    config.manifest.clone(),
    Arc::clone(&transport),
    registry,
  );
  if config.skip_waiting {
    lifecycle.skip_waiting();
  }

  let worker = Worker::new(lifecycle, transport, config.shell_key());
  Ok((worker::spawn(worker), clients))
}

/// File logging under the data directory; level via RUST_LOG.
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("offcache")
    .join("logs");

  let appender = tracing_appender::rolling::daily(log_dir, "offcache.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
