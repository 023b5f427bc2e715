use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::transport::{RetryPolicy, TransportConfig};

/// Default API endpoint used when neither the config file nor the
/// environment names one.
pub const DEFAULT_API_URL: &str = "https://api.namanh.id.vn";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub cache: CacheSettings,
  #[serde(default)]
  pub session: SessionConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_api_url")]
  pub url: String,
  /// Per-attempt request timeout
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_api_url(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
  /// Additional attempts after the first one
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  #[serde(default = "default_status_codes")]
  pub status_codes: Vec<u16>,
  #[serde(default = "default_initial_backoff_ms")]
  pub initial_backoff_ms: u64,
  #[serde(default = "default_max_backoff_ms")]
  pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: default_max_retries(),
      status_codes: default_status_codes(),
      initial_backoff_ms: default_initial_backoff_ms(),
      max_backoff_ms: default_max_backoff_ms(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
  /// Staleness window for todo lists and details
  #[serde(default = "default_stale_secs")]
  pub stale_secs: u64,
  /// Staleness window for the user directory (changes rarely)
  #[serde(default = "default_users_stale_secs")]
  pub users_stale_secs: u64,
  /// How long an unobserved entry survives before eviction
  #[serde(default = "default_gc_secs")]
  pub gc_secs: u64,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      stale_secs: default_stale_secs(),
      users_stale_secs: default_users_stale_secs(),
      gc_secs: default_gc_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
  /// Persist the session so it survives restarts
  #[serde(default = "default_true")]
  pub persist: bool,
  /// Session database location (default: $XDG_DATA_HOME/todo-sync/session.db)
  pub path: Option<PathBuf>,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      persist: true,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Filter directive, e.g. "info" or "todo_sync=debug"
  pub level: Option<String>,
  /// Directory for the rolling log file (default: data dir)
  pub dir: Option<PathBuf>,
}

fn default_api_url() -> String {
  DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_max_retries() -> u32 {
  2
}

fn default_status_codes() -> Vec<u16> {
  vec![408, 413, 429, 500, 502, 503, 504]
}

fn default_initial_backoff_ms() -> u64 {
  300
}

fn default_max_backoff_ms() -> u64 {
  3_000
}

fn default_stale_secs() -> u64 {
  5 * 60
}

fn default_users_stale_secs() -> u64 {
  10 * 60
}

fn default_gc_secs() -> u64 {
  10 * 60
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./todo-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/todo-sync/config.yaml
  ///
  /// Falls back to defaults when no file exists. Environment overrides are
  /// applied last.
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
      None => Config::default(),
    };

    Ok(config.with_env_overrides())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("todo-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("todo-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    // An empty document deserializes to unit, not to an all-default struct
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.api.timeout_secs == 0 {
      return Err(eyre!("api.timeout_secs must be at least 1"));
    }
    Ok(())
  }

  /// Apply `TODO_SYNC_API_URL` and `TODO_SYNC_LOG`.
  pub fn with_env_overrides(mut self) -> Self {
    if let Ok(url) = std::env::var("TODO_SYNC_API_URL") {
      if !url.trim().is_empty() {
        self.api.url = url;
      }
    }
    if let Ok(level) = std::env::var("TODO_SYNC_LOG") {
      self.log.level = Some(level);
    }
    self
  }

  pub fn transport(&self) -> Result<TransportConfig> {
    self.validate()?;
    let base_url = url::Url::parse(&self.api.url)
      .map_err(|e| eyre!("Invalid API url '{}': {}", self.api.url, e))?;

    Ok(TransportConfig {
      base_url,
      timeout: Duration::from_secs(self.api.timeout_secs),
      retry: RetryPolicy {
        max_retries: self.retry.max_retries,
        retryable_status_codes: self.retry.status_codes.clone(),
        initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
        max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
      },
    })
  }

  pub fn cache(&self) -> CacheConfig {
    CacheConfig::new(
      Duration::from_secs(self.cache.stale_secs),
      Duration::from_secs(self.cache.gc_secs),
    )
    .with_kind_stale_time(
      crate::cache::EntityKind::Users,
      Duration::from_secs(self.cache.users_stale_secs),
    )
  }

  /// Resolve the session database path.
  pub fn session_path(&self) -> Result<PathBuf> {
    if let Some(p) = &self.session.path {
      return Ok(p.clone());
    }
    Ok(data_dir()?.join("session.db"))
  }

  pub fn log_dir(&self) -> Result<PathBuf> {
    if let Some(p) = &self.log.dir {
      return Ok(p.clone());
    }
    Ok(data_dir()?.join("logs"))
  }
}

/// `$XDG_DATA_HOME/todo-sync`, falling back to `~/.local/share/todo-sync`.
pub fn data_dir() -> Result<PathBuf> {
  let base = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(base.join("todo-sync"))
}
