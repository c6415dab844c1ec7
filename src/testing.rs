//! Scripted collaborators shared by unit tests.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::{CacheStore, MemoryStorage};
use crate::clock::ManualClock;
use crate::network::{MonitorConfig, NetworkMonitor};
use crate::sync::SyncClient;
use crate::transport::{Pinger, Transport, TransportError, TransportRequest, TransportResponse};

/// Pinger that replays scripted verdicts, then falls back to a default.
pub struct FakePinger {
  script: Mutex<VecDeque<bool>>,
  default: Mutex<bool>,
  calls: AtomicUsize,
}

impl FakePinger {
  pub fn scripted(verdicts: Vec<bool>) -> Arc<Self> {
    Arc::new(Self {
      script: Mutex::new(verdicts.into()),
      default: Mutex::new(false),
      calls: AtomicUsize::new(0),
    })
  }

  pub fn failing() -> Arc<Self> {
    Self::scripted(Vec::new())
  }

  pub fn healthy() -> Arc<Self> {
    let pinger = Self::failing();
    pinger.set_default(true);
    pinger
  }

  pub fn set_default(&self, verdict: bool) {
    *self.default.lock().unwrap() = verdict;
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Pinger for FakePinger {
  fn ping(&self, _timeout: Duration) -> BoxFuture<'_, Result<(), TransportError>> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let verdict = self
      .script
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or(*self.default.lock().unwrap());

    Box::pin(async move {
      if verdict {
        Ok(())
      } else {
        Err(TransportError::Network("unreachable".to_string()))
      }
    })
  }
}

/// Transport that replays scripted results, then repeats a default.
pub struct FakeTransport {
  script: Mutex<VecDeque<Result<Value, TransportError>>>,
  default: Mutex<Result<Value, TransportError>>,
  requests: Mutex<Vec<TransportRequest>>,
  calls: AtomicUsize,
  latency: Duration,
}

impl FakeTransport {
  fn build(default: Result<Value, TransportError>, latency: Duration) -> Arc<Self> {
    Arc::new(Self {
      script: Mutex::new(VecDeque::new()),
      default: Mutex::new(default),
      requests: Mutex::new(Vec::new()),
      calls: AtomicUsize::new(0),
      latency,
    })
  }

  pub fn ok(body: Value) -> Arc<Self> {
    Self::build(Ok(body), Duration::ZERO)
  }

  pub fn failing() -> Arc<Self> {
    Self::build(
      Err(TransportError::Status {
        status: 503,
        reason: "Service Unavailable".to_string(),
      }),
      Duration::ZERO,
    )
  }

  pub fn slow(body: Value, latency: Duration) -> Arc<Self> {
    Self::build(Ok(body), latency)
  }

  pub fn push(&self, result: Result<Value, TransportError>) {
    self.script.lock().unwrap().push_back(result);
  }

  pub fn set_default(&self, result: Result<Value, TransportError>) {
    *self.default.lock().unwrap() = result;
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn last_request(&self) -> Option<TransportRequest> {
    self.requests.lock().unwrap().last().cloned()
  }
}

impl Transport for FakeTransport {
  fn request(
    &self,
    request: TransportRequest,
  ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.requests.lock().unwrap().push(request);

    let result = self
      .script
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or_else(|| self.default.lock().unwrap().clone());
    let latency = self.latency;

    Box::pin(async move {
      if !latency.is_zero() {
        tokio::time::sleep(latency).await;
      }
      result.map(|body| TransportResponse { status: 200, body })
    })
  }
}

/// A [`SyncClient`] over in-memory storage, a manual clock and fakes.
pub fn sync_client(
  transport: Arc<FakeTransport>,
  pinger: Arc<FakePinger>,
  online: bool,
  ttl: Duration,
) -> SyncClient {
  let clock = Arc::new(ManualClock::new(0));
  let cache = CacheStore::new(Arc::new(MemoryStorage::new()), clock.clone()).with_default_ttl(ttl);
  let monitor = NetworkMonitor::new(
    pinger,
    clock.clone(),
    MonitorConfig {
      initially_online: online,
      ..MonitorConfig::default()
    },
  );

  SyncClient::new(Arc::new(cache), monitor, transport, clock)
}
