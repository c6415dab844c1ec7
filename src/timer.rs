//! Backoff delays and cancelable scheduled tasks.
//!
//! Both the reconnect loop and the scheduler's retry policy are built on
//! these two pieces so their delay sequences can be checked without a
//! real clock (tests run on tokio's paused time).

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Exponential backoff: `base * 2^attempt`, bounded by a maximum attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
  base: Duration,
  max_attempts: u32,
}

impl Backoff {
  pub fn new(base: Duration, max_attempts: u32) -> Self {
    Self { base, max_attempts }
  }

  /// Delay before the attempt following `attempt` previous failures.
  pub fn delay(&self, attempt: u32) -> Duration {
    self.base.saturating_mul(2u32.saturating_pow(attempt))
  }

  /// True once `attempt` has reached the cap.
  pub fn exhausted(&self, attempt: u32) -> bool {
    attempt >= self.max_attempts
  }

  pub fn max_attempts(&self) -> u32 {
    self.max_attempts
  }

  pub fn base(&self) -> Duration {
    self.base
  }
}

/// A unit of work that runs once after a delay unless cancelled first.
///
/// Dropping the handle detaches the task; call [`ScheduledTask::cancel`]
/// to stop it.
#[derive(Debug)]
pub struct ScheduledTask {
  handle: JoinHandle<()>,
  delay: Duration,
}

impl ScheduledTask {
  pub fn spawn<F, Fut>(delay: Duration, work: F) -> Self
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let handle = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      work().await;
    });

    Self { handle, delay }
  }

  /// The delay this task was scheduled with.
  pub fn delay(&self) -> Duration {
    self.delay
  }

  pub fn cancel(&self) {
    self.handle.abort();
  }

  pub fn is_finished(&self) -> bool {
    self.handle.is_finished()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  #[test]
  fn test_backoff_doubles() {
    let backoff = Backoff::new(Duration::from_millis(2000), 5);
    assert_eq!(backoff.delay(0), Duration::from_millis(2000));
    assert_eq!(backoff.delay(1), Duration::from_millis(4000));
    assert_eq!(backoff.delay(2), Duration::from_millis(8000));
    assert!(!backoff.exhausted(4));
    assert!(backoff.exhausted(5));
  }

  #[test]
  fn test_backoff_saturates() {
    let backoff = Backoff::new(Duration::from_secs(1), 100);
    assert_eq!(backoff.delay(64), Duration::from_secs(u32::MAX as u64));
  }

  #[tokio::test(start_paused = true)]
  async fn test_scheduled_task_runs_after_delay() {
    let fired = Arc::new(AtomicU32::new(0));
    let counter = fired.clone();
    let task = ScheduledTask::spawn(Duration::from_secs(3), move || async move {
      counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(task.delay(), Duration::from_secs(3));

    tokio::time::sleep(Duration::from_millis(2999)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancelled_task_never_runs() {
    let fired = Arc::new(AtomicU32::new(0));
    let counter = fired.clone();
    let task = ScheduledTask::spawn(Duration::from_secs(1), move || async move {
      counter.fetch_add(1, Ordering::SeqCst);
    });

    task.cancel();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
  }
}
