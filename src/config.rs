use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::bootstrap::Manifest;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin base URL resources are fetched from.
  pub origin: String,
  /// Generation identifier naming the current store. Fixed at deploy time;
  /// bump it to roll out a new generation.
  pub generation: String,
  /// Resource keys required for offline operation, shell first.
  pub manifest: Manifest,
  /// Fallback key served when the origin is unreachable.
  /// Defaults to the first manifest entry.
  pub shell: Option<String>,
  /// Activate immediately after a successful install instead of waiting for
  /// client turnover.
  #[serde(default)]
  pub skip_waiting: bool,
  /// Keep the store in memory instead of on disk. Nothing survives the
  /// process; useful for smoke-testing a deployment config.
  #[serde(default)]
  pub ephemeral: bool,
  /// Override for the store database path. Ignored when `ephemeral` is set.
  pub store_path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offcache/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    config.validate()?;

    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.generation.trim().is_empty() {
      return Err(eyre!("Generation identifier must not be empty"));
    }
    if self.manifest.is_empty() {
      return Err(eyre!(
        "Manifest must contain at least one resource key (the offline shell)"
      ));
    }
    url::Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin URL {}: {}", self.origin, e))?;
    Ok(())
  }

  /// The key served when both cache and network fail.
  pub fn shell_key(&self) -> &str {
    self
      .shell
      .as_deref()
      .or_else(|| self.manifest.shell())
      .unwrap_or("/")
  }
}
