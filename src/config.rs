use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub marketplace: MarketplaceConfig,
  pub database: DatabaseConfig,
  pub cache: CacheConfig,
  pub queue: QueueConfig,
  pub sync: SyncConfig,
  pub server: ServerConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
  /// Base URL of the marketplace REST API
  pub api_url: String,
  /// Per-request timeout for upstream calls
  pub timeout_secs: u64,
}

impl Default for MarketplaceConfig {
  fn default() -> Self {
    Self {
      api_url: "https://api.mercadolibre.com".to_string(),
      timeout_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
  /// SQLite file (defaults to $XDG_DATA_HOME/orderdesk/orders.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Age after which a cached projection is stale
  pub ttl_minutes: i64,
  /// Age after which a fresh projection gets a mild warning
  pub warning_minutes: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_minutes: 10,
      warning_minutes: 5,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::minutes(self.ttl_minutes)
  }

  pub fn warning_age(&self) -> Duration {
    Duration::minutes(self.warning_minutes)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Items taken per processor invocation
  pub batch_size: usize,
  /// Failed attempts after which an item is dropped
  pub max_retries: u32,
  /// Items accepted per enqueue call
  pub max_enqueue: usize,
  /// Wall-clock budget for one processor invocation
  pub time_budget_ms: u64,
  /// Items older than this are purged regardless of status
  pub max_age_minutes: i64,
  /// Purge limit used by the processor's opening sweep
  pub purge_batch: usize,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      batch_size: 5,
      max_retries: 3,
      max_enqueue: 10,
      time_budget_ms: 8_000,
      max_age_minutes: 60,
      purge_batch: 20,
    }
  }
}

impl QueueConfig {
  pub fn time_budget(&self) -> std::time::Duration {
    std::time::Duration::from_millis(self.time_budget_ms)
  }

  pub fn max_age(&self) -> Duration {
    Duration::minutes(self.max_age_minutes)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub lookback_days: i64,
  pub page_size: u32,
  pub max_pages: u32,
  /// Orders edited by hand within this window are left alone by the sync
  pub manual_edit_cooldown_minutes: i64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      lookback_days: 30,
      page_size: 50,
      max_pages: 2,
      manual_edit_cooldown_minutes: 60,
    }
  }
}

impl SyncConfig {
  pub fn lookback(&self) -> Duration {
    Duration::days(self.lookback_days)
  }

  pub fn manual_edit_cooldown(&self) -> Duration {
    Duration::minutes(self.manual_edit_cooldown_minutes)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub listen: SocketAddr,
  /// Period of the background bulk sync
  pub sync_interval_secs: u64,
  /// Period of the background queue purge
  pub cleanup_interval_secs: u64,
  /// Period of the background queue processor tick
  pub queue_interval_secs: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      listen: SocketAddr::from(([127, 0, 0, 1], 3000)),
      sync_interval_secs: 300,
      cleanup_interval_secs: 3600,
      queue_interval_secs: 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default tracing filter, overridden by RUST_LOG
  pub filter: String,
  /// When set, logs go to a daily rolling file in this directory
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      filter: "info".to_string(),
      directory: None,
    }
  }
}

/// Marketplace credentials, read from the environment only.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
  pub client_id: Option<String>,
  pub client_secret: Option<String>,
  pub refresh_token: Option<String>,
  pub access_token: Option<String>,
}

impl Credentials {
  /// Read ML_CLIENT_ID, ML_CLIENT_SECRET, ML_REFRESH_TOKEN and ML_ACCESS_TOKEN.
  /// Empty values count as unset.
  pub fn from_env() -> Self {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
    Self {
      client_id: var("ML_CLIENT_ID"),
      client_secret: var("ML_CLIENT_SECRET"),
      refresh_token: var("ML_REFRESH_TOKEN"),
      access_token: var("ML_ACCESS_TOKEN"),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./orderdesk.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/orderdesk/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
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
    let local = PathBuf::from("orderdesk.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("orderdesk").join("config.yaml");
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

  /// Resolve the database file location.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("orderdesk").join("orders.db"))
  }
}
