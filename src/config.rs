use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin that relative request URLs are resolved against
  #[serde(default = "default_base_url")]
  pub base_url: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub optimistic: OptimisticConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub http: HttpConfig,
}

fn default_base_url() -> String {
  "http://localhost:8000".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub default_ttl_secs: i64,
  pub max_size: usize,
  pub cleanup_interval_secs: u64,
  /// Share one network request between concurrent GETs for the same key
  pub single_flight: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_secs: 300,
      max_size: 100,
      cleanup_interval_secs: 60,
      single_flight: false,
    }
  }
}

impl CacheConfig {
  pub fn default_ttl(&self) -> Duration {
    Duration::seconds(self.default_ttl_secs)
  }

  pub fn cleanup_interval(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.cleanup_interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_retries: u32,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self { max_retries: 3 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptimisticConfig {
  /// Path prefix under which the first segment names a resource collection
  pub api_prefix: String,
  /// Field used to match an item endpoint's trailing id against collection items
  pub id_field: String,
  /// Collection endpoints whose cached arrays are patched after writes
  pub collections: Vec<String>,
}

impl Default for OptimisticConfig {
  fn default() -> Self {
    Self {
      api_prefix: "/api".to_string(),
      id_field: "id".to_string(),
      collections: vec!["/api/expenses".to_string()],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Persist the retry queue and cache metadata to SQLite
  pub enabled: bool,
  /// Database path (defaults to $XDG_DATA_HOME/apicache/storage.db)
  pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
  pub timeout_secs: u64,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self { timeout_secs: 30 }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      cache: CacheConfig::default(),
      retry: RetryConfig::default(),
      optimistic: OptimisticConfig::default(),
      storage: StorageConfig::default(),
      http: HttpConfig::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./apicache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/apicache/config.yaml
  ///
  /// Falls back to defaults when no file exists. `APICACHE_BASE_URL` overrides `base_url`.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Some(base_url) = Self::base_url_from_env() {
      config.base_url = base_url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("apicache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("apicache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  pub fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  fn base_url_from_env() -> Option<String> {
    std::env::var("APICACHE_BASE_URL")
      .ok()
      .filter(|v| !v.trim().is_empty())
  }

  /// Parsed origin for resolving relative request URLs.
  pub fn origin(&self) -> Result<url::Url> {
    url::Url::parse(&self.base_url)
      .map_err(|e| eyre!("Invalid base_url '{}': {}", self.base_url, e))
  }
}
