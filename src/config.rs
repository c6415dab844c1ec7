use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::SqliteStorage;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub fallback: FallbackConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  pub url: String,
  /// Path pinged by the reconnect loop, relative to `url`
  #[serde(default = "default_health_path")]
  pub health_path: String,
}

fn default_health_path() -> String {
  "/health".to_string()
}

/// Timing knobs, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub ttl_ms: u64,
  pub base_reconnect_delay_ms: u64,
  pub max_reconnect_attempts: u32,
  pub fetch_timeout_ms: u64,
  pub probe_timeout_ms: u64,
  pub auto_refresh_interval_ms: u64,
  pub max_retries: u32,
  pub retry_base_delay_ms: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      ttl_ms: 5 * 60 * 1000,
      base_reconnect_delay_ms: 2000,
      max_reconnect_attempts: 5,
      fetch_timeout_ms: 30_000,
      probe_timeout_ms: 5000,
      auto_refresh_interval_ms: 5 * 60 * 1000,
      max_retries: 3,
      retry_base_delay_ms: 1000,
    }
  }
}

impl SyncConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_millis(self.ttl_ms)
  }

  pub fn base_reconnect_delay(&self) -> Duration {
    Duration::from_millis(self.base_reconnect_delay_ms)
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_millis(self.fetch_timeout_ms)
  }

  pub fn probe_timeout(&self) -> Duration {
    Duration::from_millis(self.probe_timeout_ms)
  }

  /// `None` when auto refresh is turned off (0).
  pub fn auto_refresh_interval(&self) -> Option<Duration> {
    (self.auto_refresh_interval_ms > 0)
      .then(|| Duration::from_millis(self.auto_refresh_interval_ms))
  }

  pub fn retry_base_delay(&self) -> Duration {
    Duration::from_millis(self.retry_base_delay_ms)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FallbackConfig {
  /// Serve bundled datasets when network and cache both fail
  #[serde(default)]
  pub enabled: bool,
  /// Resource name to JSON file
  #[serde(default)]
  pub files: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite file (defaults to the data directory)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./csync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/csync/config.yaml
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
        "No configuration file found. Create one at ~/.config/csync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("csync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("csync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let mut config = Self::from_yaml_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    // Fallback files are relative to the config file
    if let Some(dir) = path.parent() {
      for file in config.fallback.files.values_mut() {
        if file.is_relative() {
          *file = dir.join(&*file);
        }
      }
    }

    Ok(config)
  }

  pub fn from_yaml_str(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Backend token from `CSYNC_API_TOKEN`, if set.
  pub fn get_api_token() -> Option<String> {
    std::env::var("CSYNC_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }

  /// SQLite file holding the durable cache tier.
  pub fn storage_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }
}

/// Per-user data directory (cache database, logs).
pub fn data_dir() -> Result<PathBuf> {
  dirs::data_dir()
    .map(|d| d.join("csync"))
    .ok_or_else(|| eyre!("Could not determine data directory"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml_str("backend:\n  url: https://backend.test/exec\n").unwrap();

    assert_eq!(config.backend.health_path, "/health");
    assert_eq!(config.sync, SyncConfig::default());
    assert_eq!(config.sync.ttl(), Duration::from_secs(300));
    assert_eq!(config.sync.base_reconnect_delay(), Duration::from_secs(2));
    assert_eq!(config.sync.max_reconnect_attempts, 5);
    assert_eq!(config.sync.fetch_timeout(), Duration::from_secs(30));
    assert_eq!(config.sync.probe_timeout(), Duration::from_secs(5));
    assert!(!config.fallback.enabled);
    assert!(config.storage.path.is_none());
  }

  #[test]
  fn test_partial_sync_section() {
    let yaml = "backend:\n  url: http://localhost\nsync:\n  ttl_ms: 1000\n  auto_refresh_interval_ms: 0\n";
    let config = Config::from_yaml_str(yaml).unwrap();

    assert_eq!(config.sync.ttl(), Duration::from_secs(1));
    assert_eq!(config.sync.auto_refresh_interval(), None);
    assert_eq!(config.sync.max_retries, 3);
  }

  #[test]
  fn test_missing_backend_is_an_error() {
    assert!(Config::from_yaml_str("sync:\n  ttl_ms: 10\n").is_err());
  }

  #[test]
  fn test_fallback_paths_resolve_against_config_dir() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("csync.yaml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
      file,
      "backend:\n  url: http://localhost\nfallback:\n  enabled: true\n  files:\n    dashboard_stats: data/stats.json\n    complaints: /abs/complaints.json"
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();

    assert!(config.fallback.enabled);
    assert_eq!(
      config.fallback.files["dashboard_stats"],
      dir.path().join("data/stats.json")
    );
    assert_eq!(
      config.fallback.files["complaints"],
      PathBuf::from("/abs/complaints.json")
    );
  }

  #[test]
  fn test_explicit_missing_path() {
    let err = Config::load(Some(Path::new("/nonexistent/csync.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_storage_path_override() {
    let yaml = "backend:\n  url: http://localhost\nstorage:\n  path: /tmp/csync-test.db\n";
    let config = Config::from_yaml_str(yaml).unwrap();
    assert_eq!(config.storage_path().unwrap(), PathBuf::from("/tmp/csync-test.db"));
  }
}
