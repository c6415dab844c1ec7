//! Bundled datasets served when both network and cache come up empty.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

use crate::config::FallbackConfig;

/// Static fallback data keyed by resource name.
///
/// Disabled sets never answer, even when datasets are loaded, so production
/// deployments can ship data without serving it.
#[derive(Debug, Clone, Default)]
pub struct StaticFallback {
  enabled: bool,
  datasets: HashMap<String, Value>,
}

impl StaticFallback {
  pub fn disabled() -> Self {
    Self::default()
  }

  pub fn enabled() -> Self {
    Self {
      enabled: true,
      datasets: HashMap::new(),
    }
  }

  pub fn with_dataset(mut self, resource: impl Into<String>, data: Value) -> Self {
    self.datasets.insert(resource.into(), data);
    self
  }

  /// Load the datasets named in configuration.
  pub fn load(config: &FallbackConfig) -> Result<Self> {
    let mut fallback = Self {
      enabled: config.enabled,
      datasets: HashMap::new(),
    };

    for (resource, path) in &config.files {
      let contents = std::fs::read_to_string(path).map_err(|e| {
        eyre!(
          "Failed to read fallback data for {} from {}: {}",
          resource,
          path.display(),
          e
        )
      })?;
      let data: Value = serde_json::from_str(&contents)
        .map_err(|e| eyre!("Failed to parse fallback data {}: {}", path.display(), e))?;
      fallback.datasets.insert(resource.clone(), data);
    }

    if fallback.enabled {
      info!(resources = fallback.datasets.len(), "static fallback data enabled");
    }

    Ok(fallback)
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  pub fn get(&self, resource: &str) -> Option<&Value> {
    if !self.enabled {
      return None;
    }
    self.datasets.get(resource)
  }
}
