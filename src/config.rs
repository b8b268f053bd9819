use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::RevalidationPolicy;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Backend root, e.g. "https://erp.example.com/api"
  pub base_url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  DEFAULT_TIMEOUT_SECS
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

/// Overrides of the default revalidation policy. Anything left out keeps the
/// fetch-once default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  pub revalidate_on_focus: Option<bool>,
  pub revalidate_on_reconnect: Option<bool>,
  pub revalidate_if_stale: Option<bool>,
  pub error_retry_count: Option<u32>,
  pub error_retry_interval_ms: Option<u64>,
}

impl From<&CacheConfig> for RevalidationPolicy {
  fn from(config: &CacheConfig) -> Self {
    let defaults = RevalidationPolicy::default();
    Self {
      revalidate_on_focus: config
        .revalidate_on_focus
        .unwrap_or(defaults.revalidate_on_focus),
      revalidate_on_reconnect: config
        .revalidate_on_reconnect
        .unwrap_or(defaults.revalidate_on_reconnect),
      revalidate_if_stale: config
        .revalidate_if_stale
        .unwrap_or(defaults.revalidate_if_stale),
      error_retry_count: config.error_retry_count.unwrap_or(defaults.error_retry_count),
      error_retry_interval: config
        .error_retry_interval_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.error_retry_interval),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  /// Default filter directive, overridden by RUST_LOG
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Write daily log files here instead of stderr
  pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tradedesk.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tradedesk/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    Self::load_optional(explicit_path)?.ok_or_else(|| {
      eyre!(
        "No configuration file found. Create one at ~/.config/tradedesk/config.yaml\n\
                 or pass --config."
      )
    })
  }

  /// Like [`load`](Self::load), but finding no file at all is `Ok(None)`. A
  /// missing explicit path or a file that fails to parse is still an error.
  pub fn load_optional(explicit_path: Option<&Path>) -> Result<Option<Self>> {
    let path = match explicit_path {
      Some(p) if p.exists() => Some(p.to_path_buf()),
      Some(p) => return Err(eyre!("Config file not found: {}", p.display())),
      None => Self::find_config_file(),
    };

    path.map(|p| Self::load_from_path(&p)).transpose()
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("tradedesk.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tradedesk").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Revalidation policy new cache keys start with.
  pub fn revalidation_policy(&self) -> RevalidationPolicy {
    RevalidationPolicy::from(&self.cache)
  }

  /// Bearer token for the backend, if one is set in TRADEDESK_API_TOKEN.
  pub fn api_token() -> Option<String> {
    std::env::var("TRADEDESK_API_TOKEN")
      .ok()
      .filter(|token| !token.trim().is_empty())
  }
}
