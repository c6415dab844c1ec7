//! Wall clock abstraction so TTL and status timestamps can be driven by tests.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Source of the current time.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;

  /// Current time as epoch milliseconds.
  fn now_ms(&self) -> i64 {
    self.now().timestamp_millis()
  }
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
  now_ms: AtomicI64,
}

impl ManualClock {
  pub fn new(start_ms: i64) -> Self {
    Self {
      now_ms: AtomicI64::new(start_ms),
    }
  }

  pub fn set(&self, ms: i64) {
    self.now_ms.store(ms, Ordering::SeqCst);
  }

  pub fn advance(&self, by: Duration) {
    self
      .now_ms
      .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(self.now_ms()).unwrap_or_default()
  }

  fn now_ms(&self) -> i64 {
    self.now_ms.load(Ordering::SeqCst)
  }
}

/// Convert epoch milliseconds to a UTC timestamp for display.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
  DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_advances() {
    let clock = ManualClock::new(1_000);
    clock.advance(Duration::from_secs(2));
    assert_eq!(clock.now_ms(), 3_000);

    clock.set(0);
    assert_eq!(clock.now().timestamp_millis(), 0);
  }
}
