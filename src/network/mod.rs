//! Connectivity tracking and reconnection.

mod monitor;

pub use monitor::{MonitorConfig, NetworkMonitor, Subscription};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Snapshot of what the process believes about connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
  /// Current connectivity belief
  pub is_online: bool,
  /// Last time connectivity was confirmed
  pub last_online_at: Option<DateTime<Utc>>,
  /// Failed reconnect probes since connectivity was last confirmed
  pub reconnect_attempts: u32,
  /// Whether a reconnect probe is pending
  pub reconnect_scheduled: bool,
  /// Reconnect loop hit its cap; waiting for an external signal
  pub given_up: bool,
}

/// An `is_online` flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  Online,
  Offline,
}

/// Platform events the monitor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivitySignal {
  /// OS reports the network is back
  Online,
  /// OS reports the network is gone
  Offline,
  /// App returned to the foreground
  Foreground,
}
