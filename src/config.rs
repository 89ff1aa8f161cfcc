use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::worker::CacheNames;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub server: ServerConfig,
  pub storage: StorageConfig,
  pub worker: WorkerConfig,
  pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  /// Origin of the life tracking service
  pub url: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:5000".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Where the stores and logs live (defaults to $XDG_DATA_HOME/lifesync)
  pub data_dir: Option<PathBuf>,
  /// Prefix for every key in the local store
  pub namespace: String,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      data_dir: None,
      namespace: "lifesync".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Cache generation; bumping it drops the previous caches on activation
  pub version: String,
  /// Assets pre-cached on install
  pub static_assets: Vec<String>,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      version: "v1".to_string(),
      static_assets: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
      ],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
  /// Path polled to detect connectivity
  pub probe_path: String,
  pub probe_interval_secs: u64,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      probe_path: "/api/streak".to_string(),
      probe_interval_secs: 15,
    }
  }
}

impl MonitorConfig {
  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./lifesync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/lifesync/config.yaml
  ///
  /// Without any file the defaults are used. `LIFESYNC_SERVER_URL`
  /// overrides the server url either way.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    Ok(config.with_server_override(std::env::var("LIFESYNC_SERVER_URL").ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("lifesync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("lifesync").join("config.yaml");
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

    Ok(config)
  }

  fn with_server_override(mut self, url: Option<String>) -> Self {
    if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
      self.server.url = url;
    }
    self
  }

  /// Directory holding the stores and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.storage.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("lifesync"))
  }

  pub fn cache_names(&self) -> CacheNames {
    CacheNames::for_version(&self.storage.namespace, &self.worker.version)
  }
}
