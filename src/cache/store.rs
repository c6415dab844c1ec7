//! Cache store that layers a volatile tier over a durable one.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{CacheEntry, CacheStats, DurableStore};
use crate::clock::Clock;

/// How long a saved entry stays fresh unless the caller says otherwise.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Prefix applied to every key written to the durable medium.
pub const DEFAULT_NAMESPACE: &str = "csync.cache.";

/// Two-tier TTL cache.
///
/// Reads check the volatile tier first, then the durable tier, promoting
/// fresh durable entries. Durable failures are logged and never surface to
/// callers; the volatile tier stays authoritative for the process lifetime.
pub struct CacheStore {
  volatile: Mutex<HashMap<String, CacheEntry>>,
  durable: Arc<dyn DurableStore>,
  clock: Arc<dyn Clock>,
  namespace: String,
  default_ttl: Duration,
}

impl CacheStore {
  pub fn new(durable: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      volatile: Mutex::new(HashMap::new()),
      durable,
      clock,
      namespace: DEFAULT_NAMESPACE.to_string(),
      default_ttl: DEFAULT_TTL,
    }
  }

  /// Set the TTL used by callers that don't pick their own.
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  /// Set the durable key prefix.
  pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
    self.namespace = namespace.into();
    self
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  /// Store `payload` under `key` in both tiers.
  pub fn save(&self, key: &str, payload: Value, ttl: Duration) {
    let entry = CacheEntry::new(payload, self.clock.now_ms(), ttl);

    self.volatile().insert(key.to_string(), entry.clone());

    let persisted = serde_json::to_vec(&entry)
      .map_err(|e| color_eyre::eyre::eyre!("Failed to serialize entry: {}", e))
      .and_then(|bytes| self.durable.put(&self.durable_key(key), &bytes));

    match persisted {
      Ok(()) => debug!(key, "cache entry saved"),
      Err(e) => warn!(
        key,
        error = %e,
        "durable persistence failed; entry cached for this process only"
      ),
    }
  }

  /// Fresh payload for `key`, if any.
  ///
  /// Stale entries found along the way are deleted from both tiers.
  pub fn get(&self, key: &str) -> Option<Value> {
    self.get_entry(key).map(|entry| entry.payload)
  }

  /// Like [`CacheStore::get`] but returns the whole envelope.
  pub fn get_entry(&self, key: &str) -> Option<CacheEntry> {
    let now = self.clock.now_ms();

    let volatile_stale = match self.volatile().get(key) {
      Some(entry) if entry.is_fresh(now) => {
        debug!(key, "volatile cache hit");
        return Some(entry.clone());
      }
      Some(_) => true,
      None => false,
    };

    match self.read_durable(key) {
      Some(entry) if entry.is_fresh(now) => {
        debug!(key, "durable cache hit, promoting");
        self.volatile().insert(key.to_string(), entry.clone());
        Some(entry)
      }
      Some(_) => {
        debug!(key, "cache entry expired");
        self.remove(key);
        None
      }
      None => {
        if volatile_stale {
          self.volatile().remove(key);
        }
        None
      }
    }
  }

  /// True iff [`CacheStore::get`] would currently return a payload.
  ///
  /// Never promotes or deletes.
  pub fn is_fresh(&self, key: &str) -> bool {
    let now = self.clock.now_ms();

    if let Some(entry) = self.volatile().get(key) {
      if entry.is_fresh(now) {
        return true;
      }
    }

    self
      .read_durable(key)
      .is_some_and(|entry| entry.is_fresh(now))
  }

  /// True unless `key` holds an entry that stays fresh for at least `window`.
  pub fn expires_within(&self, key: &str, window: Duration) -> bool {
    let horizon = self
      .clock
      .now_ms()
      .saturating_add(window.as_millis().min(i64::MAX as u128) as i64);
    self.peek(key).map_or(true, |entry| !entry.is_fresh(horizon))
  }

  /// Entry for `key` whether fresh or stale. Never deletes.
  pub fn peek(&self, key: &str) -> Option<CacheEntry> {
    if let Some(entry) = self.volatile().get(key) {
      return Some(entry.clone());
    }
    self.read_durable(key)
  }

  /// Delete `key` from both tiers.
  pub fn remove(&self, key: &str) {
    self.volatile().remove(key);

    if let Err(e) = self.durable.delete(&self.durable_key(key)) {
      warn!(key, error = %e, "failed to delete durable cache entry");
    }
  }

  /// Delete every key for which `matches` holds. Returns the number removed.
  pub fn remove_matching<F>(&self, matches: F) -> usize
  where
    F: Fn(&str) -> bool,
  {
    let doomed: Vec<String> = self
      .keys()
      .into_iter()
      .filter(|key| matches(key))
      .collect();

    for key in &doomed {
      self.remove(key);
    }

    doomed.len()
  }

  /// Delete every entry in this store's namespace from both tiers.
  ///
  /// Only keys under the namespace prefix are touched on the durable medium.
  pub fn clear_all(&self) {
    self.volatile().clear();

    match self.durable.delete_prefix(&self.namespace) {
      Ok(removed) => debug!(removed, "cache cleared"),
      Err(e) => warn!(error = %e, "failed to clear durable cache"),
    }
  }

  /// Remove every stale entry. Returns the number removed.
  pub fn sweep_expired(&self) -> usize {
    let now = self.clock.now_ms();
    let expired: Vec<String> = self
      .keys()
      .into_iter()
      .filter(|key| self.peek(key).is_some_and(|entry| !entry.is_fresh(now)))
      .collect();

    for key in &expired {
      self.remove(key);
    }

    if !expired.is_empty() {
      debug!(removed = expired.len(), "swept expired cache entries");
    }
    expired.len()
  }

  /// All keys in either tier, sorted, without the namespace prefix.
  pub fn keys(&self) -> Vec<String> {
    let mut keys: BTreeSet<String> = self.volatile().keys().cloned().collect();
    keys.extend(self.durable_keys());
    keys.into_iter().collect()
  }

  pub fn stats(&self) -> CacheStats {
    let volatile_count = self.volatile().len();
    let durable_count = self.durable_keys().len();

    CacheStats {
      volatile_count,
      durable_count,
      keys: self.keys(),
    }
  }

  fn durable_key(&self, key: &str) -> String {
    format!("{}{}", self.namespace, key)
  }

  fn durable_keys(&self) -> Vec<String> {
    match self.durable.keys_with_prefix(&self.namespace) {
      Ok(keys) => keys
        .into_iter()
        .filter_map(|k| k.strip_prefix(&self.namespace).map(String::from))
        .collect(),
      Err(e) => {
        warn!(error = %e, "failed to list durable cache keys");
        Vec::new()
      }
    }
  }

  fn read_durable(&self, key: &str) -> Option<CacheEntry> {
    let durable_key = self.durable_key(key);

    let bytes = match self.durable.get(&durable_key) {
      Ok(bytes) => bytes?,
      Err(e) => {
        warn!(key, error = %e, "failed to read durable cache entry");
        return None;
      }
    };

    match serde_json::from_slice(&bytes) {
      Ok(entry) => Some(entry),
      Err(e) => {
        warn!(key, error = %e, "discarding unreadable durable cache entry");
        let _ = self.durable.delete(&durable_key);
        None
      }
    }
  }

  fn volatile(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    self
      .volatile
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}
