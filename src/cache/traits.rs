//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::clock;

/// Durable key/value medium backing the cache.
///
/// The medium may hold unrelated data; the cache only ever touches keys
/// under its own prefix.
pub trait DurableStore: Send + Sync {
  /// Read the raw value stored under `key`.
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

  /// Write `value` under `key`, replacing any previous value.
  fn put(&self, key: &str, value: &[u8]) -> Result<()>;

  /// Delete `key`. Deleting a missing key is not an error.
  fn delete(&self, key: &str) -> Result<()>;

  /// All keys starting with `prefix`.
  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

  /// Delete all keys starting with `prefix`, returning how many were removed.
  fn delete_prefix(&self, prefix: &str) -> Result<usize> {
    let keys = self.keys_with_prefix(prefix)?;
    for key in &keys {
      self.delete(key)?;
    }
    Ok(keys.len())
  }
}

/// Envelope persisted for every cached key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  /// The cached value
  pub payload: Value,
  /// When the entry was written (epoch ms)
  pub stored_at: i64,
  /// When the entry stops being fresh (epoch ms)
  pub expires_at: i64,
}

impl CacheEntry {
  pub fn new(payload: Value, stored_at: i64, ttl: Duration) -> Self {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    Self {
      payload,
      stored_at,
      expires_at: stored_at.saturating_add(ttl_ms),
    }
  }

  /// Fresh while `now < expires_at`.
  pub fn is_fresh(&self, now_ms: i64) -> bool {
    now_ms < self.expires_at
  }

  pub fn stored_at(&self) -> DateTime<Utc> {
    clock::from_millis(self.stored_at)
  }
}

/// Point-in-time view of what the cache holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub volatile_count: usize,
  pub durable_count: usize,
  /// Every key present in either tier, sorted
  pub keys: Vec<String>,
}
