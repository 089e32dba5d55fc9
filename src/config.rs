use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
  pub connectivity: ConnectivityConfig,
  pub storage: StorageConfig,
  /// User whose saved deals the CLI works on when `--user` is not given
  pub default_user: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub url: String,
  /// Per-request timeout; a timed-out sync item stays queued
  pub timeout_secs: u64,
  /// Path probed to decide whether the API is reachable
  pub health_path: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:8080".to_string(),
      timeout_secs: 10,
      health_path: "/health".to_string(),
    }
  }
}

impl ApiConfig {
  pub fn health_url(&self) -> String {
    format!(
      "{}/{}",
      self.url.trim_end_matches('/'),
      self.health_path.trim_start_matches('/')
    )
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Lifetime of cached deal listings; 0 disables the listing cache
  pub deal_ttl_secs: u64,
  /// Lifetime of cached API responses; 0 disables the response cache
  pub api_ttl_secs: u64,
  /// How often `watch` sweeps expired entries
  pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      deal_ttl_secs: 300,
      api_ttl_secs: 60,
      sweep_interval_secs: 600,
    }
  }
}

impl CacheConfig {
  pub fn deal_ttl(&self) -> Duration {
    Duration::from_secs(self.deal_ttl_secs)
  }

  pub fn api_ttl(&self) -> Duration {
    Duration::from_secs(self.api_ttl_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Rejections (non-retryable 4xx) after which a queued item is dropped.
  /// 0 keeps rejected items queued forever.
  pub max_rejections: u32,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self { max_rejections: 3 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// Quiet period a raw signal change must hold before it counts
  pub debounce_ms: u64,
  pub probe_interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      debounce_ms: 1500,
      probe_interval_secs: 5,
    }
  }
}

impl ConnectivityConfig {
  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Store file (default: $XDG_DATA_HOME/dealstash/store.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./dealstash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/dealstash/config.yaml
  ///
  /// Without any file the defaults apply.
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
      None => {
        tracing::debug!("No configuration file found, using defaults");
        Ok(Config::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("dealstash.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("dealstash").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the API token from the environment, if one is set.
  ///
  /// Checks DEALSTASH_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("DEALSTASH_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}
