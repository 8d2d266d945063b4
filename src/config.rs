use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::apod::types::default_service_start;
use crate::retry::RetryPolicy;

const DEFAULT_BASE_URL: &str = "https://api.nasa.gov/planetary/apod";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub retry: RetryConfig,
  pub assets: AssetsConfig,
  pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Endpoint queried for records
  pub base_url: Url,
  /// Earliest date the service has a record for
  pub service_start: NaiveDate,
  /// End-to-end timeout for a single request
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      service_start: default_service_start(),
      timeout_secs: 30,
    }
  }
}

fn default_base_url() -> Url {
  Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub base_delay_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay_ms: 1000,
    }
  }
}

impl RetryConfig {
  pub fn policy(&self) -> RetryPolicy {
    RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
  /// Persistent tier directory (defaults to <cache_dir>/apod/images)
  pub directory: Option<PathBuf>,
  pub memory_max_entries: u64,
  pub memory_max_bytes: u64,
  pub disk_max_bytes: u64,
  /// JPEG quality for the persistent tier, 1-100
  pub jpeg_quality: u8,
}

impl Default for AssetsConfig {
  fn default() -> Self {
    Self {
      directory: None,
      memory_max_entries: 50,
      memory_max_bytes: 50 * 1024 * 1024,
      disk_max_bytes: 100 * 1024 * 1024,
      jpeg_quality: 80,
    }
  }
}

impl AssetsConfig {
  /// Resolve the persistent tier directory.
  pub fn directory(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.directory {
      return Ok(dir.clone());
    }

    dirs::cache_dir()
      .map(|dir| dir.join("apod").join("images"))
      .ok_or_else(|| eyre!("Could not determine cache directory; set assets.directory"))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// Run the background reachability probe
  pub probe: bool,
  pub probe_interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe: true,
      probe_interval_secs: 10,
    }
  }
}

impl ConnectivityConfig {
  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./apod.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/apod/config.yaml
  ///
  /// Without a file every setting takes its default.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("apod.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("apod").join("config.yaml");
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
    // An empty file is valid and means "all defaults"
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }

    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if !(1..=100).contains(&self.assets.jpeg_quality) {
      return Err(eyre!(
        "assets.jpeg_quality must be between 1 and 100, got {}",
        self.assets.jpeg_quality
      ));
    }
    if self.assets.memory_max_entries == 0 {
      return Err(eyre!("assets.memory_max_entries must be at least 1"));
    }
    Ok(())
  }

  /// Get the service API key from environment variables.
  ///
  /// Checks APOD_API_KEY first, then NASA_API_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    resolve_api_key(
      std::env::var("APOD_API_KEY").ok(),
      std::env::var("NASA_API_KEY").ok(),
    )
    .ok_or_else(|| {
      eyre!("API key not found. Set APOD_API_KEY or NASA_API_KEY environment variable.")
    })
  }
}

fn resolve_api_key(primary: Option<String>, fallback: Option<String>) -> Option<String> {
  [primary, fallback]
    .into_iter()
    .flatten()
    .map(|key| key.trim().to_string())
    .find(|key| !key.is_empty())
}
