//! Per-resource sync status.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::client::FetchOutcome;
use super::error::SyncError;
use crate::clock::Clock;

/// Observable summary of a resource (or the whole client).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
  /// A fetch is in flight
  pub is_loading: bool,
  /// Last successful fetch, from cache or network
  pub last_sync_at: Option<DateTime<Utc>>,
  /// Last failure, cleared by the next success
  pub error: Option<String>,
  /// Scheduler retries used since the last success
  pub retry_count: u32,
}

#[derive(Default)]
struct Board {
  statuses: BTreeMap<String, SyncStatus>,
  /// Key that most recently recorded an error
  last_error_key: Option<String>,
}

/// Holds a [`SyncStatus`] per cache key.
pub struct StatusBoard {
  board: Mutex<Board>,
  clock: Arc<dyn Clock>,
}

impl StatusBoard {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self {
      board: Mutex::new(Board::default()),
      clock,
    }
  }

  pub fn get(&self, key: &str) -> SyncStatus {
    self.board().statuses.get(key).cloned().unwrap_or_default()
  }

  pub fn all(&self) -> BTreeMap<String, SyncStatus> {
    self.board().statuses.clone()
  }

  /// Summary across every resource.
  pub fn overall(&self) -> SyncStatus {
    let board = self.board();
    let error = board
      .last_error_key
      .as_ref()
      .and_then(|key| board.statuses.get(key))
      .and_then(|status| status.error.clone());

    SyncStatus {
      is_loading: board.statuses.values().any(|s| s.is_loading),
      last_sync_at: board.statuses.values().filter_map(|s| s.last_sync_at).max(),
      error,
      retry_count: board.statuses.values().map(|s| s.retry_count).max().unwrap_or(0),
    }
  }

  pub fn begin(&self, key: &str) {
    self.board().statuses.entry(key.to_string()).or_default().is_loading = true;
  }

  /// Settle a finished fetch.
  ///
  /// A result served with a warning counts as a failure: data is usable but
  /// the network attempt did not succeed.
  pub fn record(&self, key: &str, result: &Result<FetchOutcome, SyncError>) {
    let now = self.clock.now();
    let mut board = self.board();
    let failure = match result {
      Ok(outcome) => outcome.warning.clone(),
      Err(e) => Some(e.to_string()),
    };

    let status = board.statuses.entry(key.to_string()).or_default();
    status.is_loading = false;
    match failure {
      None => {
        status.last_sync_at = Some(now);
        status.error = None;
      }
      Some(message) => {
        status.error = Some(message);
        board.last_error_key = Some(key.to_string());
      }
    }
  }

  pub fn set_retry_count(&self, key: &str, retry_count: u32) {
    self.board().statuses.entry(key.to_string()).or_default().retry_count = retry_count;
  }

  fn board(&self) -> MutexGuard<'_, Board> {
    self.board.lock().unwrap_or_else(|e| e.into_inner())
  }
}
