//! Single-flight deduplication of concurrent fetches.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::error::SyncError;

type Flight<T> = Shared<BoxFuture<'static, Result<T, SyncError>>>;

/// At most one operation per key runs at a time; later callers for the same
/// key await the running one and receive a clone of its result.
///
/// Operations are spawned, so they finish even if every caller goes away.
pub struct SingleFlight<T: Clone> {
  flights: Arc<Mutex<HashMap<String, Flight<T>>>>,
}

impl<T> SingleFlight<T>
where
  T: Clone + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self {
      flights: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Join the flight for `key`, or start one with `start`.
  ///
  /// `start` is only called when no flight is running, and is called while
  /// the flight table is locked, so it must not block.
  pub async fn run<F>(&self, key: &str, start: F) -> Result<T, SyncError>
  where
    F: FnOnce() -> BoxFuture<'static, Result<T, SyncError>>,
  {
    let flight = {
      let mut flights = lock(&self.flights);
      match flights.get(key) {
        Some(flight) => {
          debug!(key, "joining in-flight fetch");
          flight.clone()
        }
        None => {
          let work = start();
          let table = Arc::clone(&self.flights);
          let owned_key = key.to_string();
          let handle = tokio::spawn(async move {
            // Clears the table entry even if `work` panics
            let _landing = Landing {
              table,
              key: owned_key,
            };
            work.await
          });

          let aborted_key = key.to_string();
          let flight = async move {
            handle
              .await
              .unwrap_or_else(|_| Err(SyncError::Aborted(aborted_key)))
          }
          .boxed()
          .shared();

          flights.insert(key.to_string(), flight.clone());
          flight
        }
      }
    };

    flight.await
  }

  /// Whether an operation for `key` is running.
  pub fn in_flight(&self, key: &str) -> bool {
    lock(&self.flights).contains_key(key)
  }
}

impl<T> Default for SingleFlight<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

/// Removes a finished flight from the table when dropped.
struct Landing<T: Clone> {
  table: Arc<Mutex<HashMap<String, Flight<T>>>>,
  key: String,
}

impl<T: Clone> Drop for Landing<T> {
  fn drop(&mut self) {
    lock(&self.table).remove(&self.key);
  }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_callers_share_one_run() {
    let flights = SingleFlight::<u32>::new();
    let runs = Arc::new(AtomicU32::new(0));

    let start = |runs: Arc<AtomicU32>| {
      move || {
        async move {
          tokio::time::sleep(Duration::from_millis(50)).await;
          Ok::<_, SyncError>(runs.fetch_add(1, Ordering::SeqCst) + 1)
        }
        .boxed()
      }
    };

    let (a, b) = tokio::join!(
      flights.run("k", start(runs.clone())),
      flights.run("k", start(runs.clone()))
    );

    assert_eq!(a, Ok(1));
    assert_eq!(b, Ok(1));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!flights.in_flight("k"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_sequential_callers_run_again() {
    let flights = SingleFlight::<u32>::new();

    let first = flights.run("k", || async { Ok::<_, SyncError>(1) }.boxed()).await;
    let second = flights.run("k", || async { Ok::<_, SyncError>(2) }.boxed()).await;

    assert_eq!(first, Ok(1));
    assert_eq!(second, Ok(2));
  }

  async fn explode() -> Result<u32, SyncError> {
    panic!("fetch blew up")
  }

  #[tokio::test(start_paused = true)]
  async fn test_panicking_run_is_cleared() {
    let flights = SingleFlight::<u32>::new();

    let first = flights.run("k", || explode().boxed()).await;
    assert_eq!(first, Err(SyncError::Aborted("k".to_string())));
    assert!(!flights.in_flight("k"));

    let second = flights.run("k", || async { Ok::<_, SyncError>(2) }.boxed()).await;
    assert_eq!(second, Ok(2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_different_keys_run_independently() {
    let flights = SingleFlight::<&'static str>::new();

    let (a, b) = tokio::join!(
      flights.run("a", || async { Ok::<_, SyncError>("a") }.boxed()),
      flights.run("b", || async { Ok::<_, SyncError>("b") }.boxed())
    );

    assert_eq!(a, Ok("a"));
    assert_eq!(b, Ok("b"));
  }
}
