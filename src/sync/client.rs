//! Cache-aside client: serves reads through the fallback chain and routes
//! writes straight to the network.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::SyncError;
use super::fallback::StaticFallback;
use super::flight::SingleFlight;
use super::key::{InvalidationTag, ResourceKey};
use super::status::{StatusBoard, SyncStatus};
use crate::cache::{CacheEntry, CacheStore};
use crate::clock::Clock;
use crate::network::NetworkMonitor;
use crate::transport::{with_timeout, Transport, TransportError, TransportRequest};

/// Default deadline for bulk data requests.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a fetched payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
  /// Fresh data from network
  Network,
  /// Cache was fresh, network not consulted
  CacheFresh,
  /// Offline - network believed unavailable, serving cached data
  Offline,
  /// Network failed, serving cached data (possibly stale)
  CacheFallback,
  /// Network failed and nothing cached, serving bundled data
  StaticFallback,
}

/// Result of a fetch, with metadata about the source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchOutcome {
  /// The actual data
  pub payload: Value,
  /// Where the data came from
  pub source: FetchSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
  /// Set when data is served in place of a failed network attempt
  pub warning: Option<String>,
}

impl FetchOutcome {
  pub fn from_network(payload: Value) -> Self {
    Self {
      payload,
      source: FetchSource::Network,
      cached_at: None,
      warning: None,
    }
  }

  pub fn fresh_cache(entry: CacheEntry) -> Self {
    Self {
      cached_at: Some(entry.stored_at()),
      payload: entry.payload,
      source: FetchSource::CacheFresh,
      warning: None,
    }
  }

  pub fn offline(entry: CacheEntry) -> Self {
    Self {
      cached_at: Some(entry.stored_at()),
      payload: entry.payload,
      source: FetchSource::Offline,
      warning: None,
    }
  }

  pub fn cache_fallback(entry: CacheEntry, error: &TransportError) -> Self {
    Self {
      cached_at: Some(entry.stored_at()),
      payload: entry.payload,
      source: FetchSource::CacheFallback,
      warning: Some(format!("Data from cache - network unavailable ({})", error)),
    }
  }

  pub fn static_fallback(payload: Value, error: &TransportError) -> Self {
    Self {
      payload,
      source: FetchSource::StaticFallback,
      cached_at: None,
      warning: Some(format!("Showing bundled data - network unavailable ({})", error)),
    }
  }

  /// True unless the payload came straight from the network.
  pub fn from_cache(&self) -> bool {
    self.source != FetchSource::Network
  }
}

/// Per-call fetch knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
  /// Go to the network even if the cache is fresh
  pub force: bool,
  /// Override the client's fetch timeout
  pub timeout: Option<Duration>,
  /// Override the cache TTL for the stored result
  pub ttl: Option<Duration>,
}

impl FetchOptions {
  pub fn forced() -> Self {
    Self {
      force: true,
      ..Self::default()
    }
  }
}

/// A network write and the cache it makes stale.
#[derive(Debug, Clone)]
pub struct MutationRequest {
  pub request: TransportRequest,
  pub invalidates: Vec<InvalidationTag>,
}

/// Cache-aside client.
///
/// Cheap to clone; clones share the cache, monitor and in-flight table.
#[derive(Clone)]
pub struct SyncClient {
  cache: Arc<CacheStore>,
  monitor: Arc<NetworkMonitor>,
  transport: Arc<dyn Transport>,
  fallback: Arc<StaticFallback>,
  statuses: Arc<StatusBoard>,
  flights: Arc<SingleFlight<FetchOutcome>>,
  fetch_timeout: Duration,
}

impl SyncClient {
  pub fn new(
    cache: Arc<CacheStore>,
    monitor: Arc<NetworkMonitor>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      cache,
      monitor,
      transport,
      fallback: Arc::new(StaticFallback::disabled()),
      statuses: Arc::new(StatusBoard::new(clock)),
      flights: Arc::new(SingleFlight::new()),
      fetch_timeout: DEFAULT_FETCH_TIMEOUT,
    }
  }

  pub fn with_fallback(mut self, fallback: StaticFallback) -> Self {
    self.fallback = Arc::new(fallback);
    self
  }

  pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
    self.fetch_timeout = timeout;
    self
  }

  pub fn cache(&self) -> &Arc<CacheStore> {
    &self.cache
  }

  pub fn monitor(&self) -> &Arc<NetworkMonitor> {
    &self.monitor
  }

  /// Fetch `key` through the fallback chain.
  ///
  /// Concurrent calls for the same key share one underlying fetch.
  pub async fn fetch(
    &self,
    key: &ResourceKey,
    request: TransportRequest,
    options: FetchOptions,
  ) -> Result<FetchOutcome, SyncError> {
    let cache_key = key.cache_key();

    let result = self
      .flights
      .run(&cache_key, || {
        self.statuses.begin(&cache_key);
        let client = self.clone();
        let key = key.clone();
        async move {
          let result = client.fetch_through(&key, request, options).await;
          client.statuses.record(&key.cache_key(), &result);
          result
        }
        .boxed()
      })
      .await;

    // A fetch that died never settled its status
    if let Err(SyncError::Aborted(_)) = &result {
      self.statuses.record(&cache_key, &result);
    }

    result
  }

  /// Drop every cached entry matching `tag`. Visible to the next read
  /// as soon as this returns.
  pub fn invalidate(&self, tag: &InvalidationTag) -> usize {
    let removed = self.cache.remove_matching(|key| tag.matches_key(key));
    debug!(%tag, removed, "cache invalidated");
    removed
  }

  /// Send a write. Never served from cache; on success the request's
  /// invalidation tags are applied before returning.
  pub async fn mutate(&self, mutation: MutationRequest) -> Result<Value, SyncError> {
    match self.send(mutation.request).await {
      Ok(body) => {
        self.monitor.mark_online();
        for tag in &mutation.invalidates {
          self.invalidate(tag);
        }
        Ok(body)
      }
      Err(e) => {
        warn!(error = %e, "mutation failed");
        self.note_failure();
        Err(SyncError::Transport(e))
      }
    }
  }

  pub fn status(&self, key: &ResourceKey) -> SyncStatus {
    self.statuses.get(&key.cache_key())
  }

  pub fn statuses(&self) -> BTreeMap<String, SyncStatus> {
    self.statuses.all()
  }

  pub fn overall_status(&self) -> SyncStatus {
    self.statuses.overall()
  }

  pub(crate) fn set_retry_count(&self, key: &ResourceKey, retry_count: u32) {
    self.statuses.set_retry_count(&key.cache_key(), retry_count);
  }

  pub fn is_fetching(&self, key: &ResourceKey) -> bool {
    self.flights.in_flight(&key.cache_key())
  }

  async fn fetch_through(
    &self,
    key: &ResourceKey,
    mut request: TransportRequest,
    options: FetchOptions,
  ) -> Result<FetchOutcome, SyncError> {
    let cache_key = key.cache_key();
    let online = self.monitor.is_online();

    if online && !options.force {
      if let Some(entry) = self.cache.get_entry(&cache_key) {
        debug!(key = %cache_key, "serving fresh cache");
        return Ok(FetchOutcome::fresh_cache(entry));
      }
    }

    if !online {
      if let Some(entry) = self.cache.peek(&cache_key) {
        info!(key = %cache_key, "offline, serving cached data");
        return Ok(FetchOutcome::offline(entry));
      }
    }

    if let Some(timeout) = options.timeout {
      request.timeout = timeout;
    }

    match self.send(request).await {
      Ok(payload) => {
        let ttl = options.ttl.unwrap_or_else(|| self.cache.default_ttl());
        self.cache.save(&cache_key, payload.clone(), ttl);
        self.monitor.mark_online();
        Ok(FetchOutcome::from_network(payload))
      }
      Err(e) => {
        warn!(key = %cache_key, error = %e, "network fetch failed");
        self.note_failure();
        self.fall_back(key, e)
      }
    }
  }

  fn fall_back(&self, key: &ResourceKey, error: TransportError) -> Result<FetchOutcome, SyncError> {
    let cache_key = key.cache_key();

    if let Some(entry) = self.cache.peek(&cache_key) {
      info!(key = %cache_key, "using cached data after network failure");
      return Ok(FetchOutcome::cache_fallback(entry, &error));
    }

    if let Some(data) = self.fallback.get(key.resource()) {
      info!(key = %cache_key, "using static fallback data");
      return Ok(FetchOutcome::static_fallback(data.clone(), &error));
    }

    Err(SyncError::NoFallbackAvailable {
      resource: cache_key,
      source: error,
    })
  }

  async fn send(&self, request: TransportRequest) -> Result<Value, TransportError> {
    let timeout = if request.timeout.is_zero() {
      self.fetch_timeout
    } else {
      request.timeout
    };

    let response = with_timeout(timeout, self.transport.request(request)).await?;
    Ok(response.body)
  }

  fn note_failure(&self) {
    self.monitor.mark_offline();
    self.monitor.schedule_reconnect();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::clock::ManualClock;
  use crate::network::MonitorConfig;
  use crate::testing::{FakePinger, FakeTransport};
  use serde_json::json;

  const TTL: Duration = Duration::from_millis(300_000);

  struct Harness {
    client: SyncClient,
    transport: Arc<FakeTransport>,
    clock: Arc<ManualClock>,
  }

  fn harness(transport: Arc<FakeTransport>, online: bool) -> Harness {
    let clock = Arc::new(ManualClock::new(0));
    let cache = Arc::new(CacheStore::new(Arc::new(MemoryStorage::new()), clock.clone()));
    let monitor = NetworkMonitor::new(
      FakePinger::failing(),
      clock.clone(),
      MonitorConfig {
        initially_online: online,
        ..MonitorConfig::default()
      },
    );
    let client = SyncClient::new(cache, monitor, transport.clone(), clock.clone());

    Harness {
      client,
      transport,
      clock,
    }
  }

  fn request() -> TransportRequest {
    TransportRequest::get("http://backend.test/exec", Duration::from_secs(30))
  }

  fn dashboard() -> ResourceKey {
    ResourceKey::new("dashboard_stats")
  }

  #[tokio::test(start_paused = true)]
  async fn test_offline_fresh_cache_skips_transport() {
    let h = harness(FakeTransport::ok(json!("live")), false);
    h.client.cache().save("dashboard_stats", json!("cached"), TTL);

    let outcome = h
      .client
      .fetch(&dashboard(), request(), FetchOptions::default())
      .await
      .unwrap();

    assert_eq!(h.transport.calls(), 0);
    assert_eq!(outcome.payload, json!("cached"));
    assert_eq!(outcome.source, FetchSource::Offline);
    assert!(outcome.from_cache());
  }

  #[tokio::test(start_paused = true)]
  async fn test_offline_stale_cache_still_served() {
    let h = harness(FakeTransport::ok(json!("live")), false);
    h.client.cache().save("dashboard_stats", json!("old"), TTL);
    h.clock.set(10_000_000);

    let outcome = h
      .client
      .fetch(&dashboard(), request(), FetchOptions::default())
      .await
      .unwrap();

    assert_eq!(h.transport.calls(), 0);
    assert_eq!(outcome.payload, json!("old"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_offline_without_cache_tries_network() {
    let h = harness(FakeTransport::ok(json!("live")), false);

    let outcome = h
      .client
      .fetch(&dashboard(), request(), FetchOptions::default())
      .await
      .unwrap();

    assert_eq!(h.transport.calls(), 1);
    assert_eq!(outcome.source, FetchSource::Network);
    assert!(h.client.monitor().is_online());
  }

  #[tokio::test(start_paused = true)]
  async fn test_network_success_populates_cache() {
    let h = harness(FakeTransport::ok(json!({"total": 3})), true);

    let outcome = h
      .client
      .fetch(&dashboard(), request(), FetchOptions::default())
      .await
      .unwrap();

    assert_eq!(outcome.source, FetchSource::Network);
    assert!(!outcome.from_cache());
    assert_eq!(h.client.cache().get("dashboard_stats"), Some(json!({"total": 3})));

    let status = h.client.status(&dashboard());
    assert!(!status.is_loading);
    assert!(status.last_sync_at.is_some());
    assert_eq!(status.error, None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_fresh_cache_short_circuits_unless_forced() {
    let h = harness(FakeTransport::ok(json!("live")), true);
    h.client.cache().save("dashboard_stats", json!("cached"), TTL);

    let cached = h
      .client
      .fetch(&dashboard(), request(), FetchOptions::default())
      .await
      .unwrap();
    assert_eq!(cached.source, FetchSource::CacheFresh);
    assert_eq!(h.transport.calls(), 0);

    let forced = h
      .client
      .fetch(&dashboard(), request(), FetchOptions::forced())
      .await
      .unwrap();
    assert_eq!(forced.source, FetchSource::Network);
    assert_eq!(forced.payload, json!("live"));
    assert_eq!(h.transport.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_falls_back_to_stale_cache() {
    let h = harness(FakeTransport::failing(), true);
    h.client.cache().save("dashboard_stats", json!("old"), TTL);
    h.clock.set(10_000_000);

    let outcome = h
      .client
      .fetch(&dashboard(), request(), FetchOptions::default())
      .await
      .unwrap();

    assert_eq!(h.transport.calls(), 1);
    assert_eq!(outcome.payload, json!("old"));
    assert_eq!(outcome.source, FetchSource::CacheFallback);
    assert!(outcome.from_cache());
    assert!(outcome.warning.is_some());

    let network = h.client.monitor().current_status();
    assert!(!network.is_online);
    assert!(network.reconnect_scheduled);

    let status = h.client.status(&dashboard());
    assert!(status.error.is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_without_fallback_is_an_error() {
    let h = harness(FakeTransport::failing(), true);

    let result = h
      .client
      .fetch(&dashboard(), request(), FetchOptions::default())
      .await;

    assert!(matches!(
      result,
      Err(SyncError::NoFallbackAvailable {
        source: TransportError::Status { status: 503, .. },
        ..
      })
    ));
    assert!(h.client.status(&dashboard()).error.is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_static_fallback_when_enabled() {
    let h = harness(FakeTransport::failing(), true);
    let client = h
      .client
      .clone()
      .with_fallback(StaticFallback::enabled().with_dataset("dashboard_stats", json!({"total": 0})));

    let outcome = client
      .fetch(&dashboard(), request(), FetchOptions::default())
      .await
      .unwrap();

    assert_eq!(outcome.source, FetchSource::StaticFallback);
    assert_eq!(outcome.payload, json!({"total": 0}));
    assert!(client.cache().get("dashboard_stats").is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_static_fallback_ignored_when_disabled() {
    let h = harness(FakeTransport::failing(), true);
    let client = h
      .client
      .clone()
      .with_fallback(StaticFallback::disabled().with_dataset("dashboard_stats", json!({})));

    let result = client
      .fetch(&dashboard(), request(), FetchOptions::default())
      .await;

    assert!(matches!(result, Err(SyncError::NoFallbackAvailable { .. })));
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeout_counts_as_failure() {
    let h = harness(FakeTransport::slow(json!("late"), Duration::from_secs(60)), true);

    let result = h
      .client
      .fetch(
        &dashboard(),
        request(),
        FetchOptions {
          timeout: Some(Duration::from_secs(5)),
          ..FetchOptions::default()
        },
      )
      .await;

    assert_eq!(
      result,
      Err(SyncError::NoFallbackAvailable {
        resource: "dashboard_stats".to_string(),
        source: TransportError::Timeout(Duration::from_secs(5)),
      })
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_mutation_invalidates_before_returning() {
    let h = harness(FakeTransport::ok(json!(["c1"])), true);
    let complaints = ResourceKey::with_params("complaints", "");

    h.client
      .fetch(&complaints, request(), FetchOptions::default())
      .await
      .unwrap();
    assert!(h.client.cache().is_fresh(&complaints.cache_key()));

    h.client
      .mutate(MutationRequest {
        request: TransportRequest::post("http://backend.test/exec", json!({}), Duration::ZERO),
        invalidates: vec![InvalidationTag::resource("complaints")],
      })
      .await
      .unwrap();
    assert!(!h.client.cache().is_fresh(&complaints.cache_key()));

    let outcome = h
      .client
      .fetch(&complaints, request(), FetchOptions::default())
      .await
      .unwrap();
    assert_eq!(outcome.source, FetchSource::Network);
    assert_eq!(h.transport.calls(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_mutation_keeps_cache() {
    let h = harness(FakeTransport::failing(), true);
    h.client.cache().save("complaints", json!([]), TTL);

    let result = h
      .client
      .mutate(MutationRequest {
        request: TransportRequest::post("http://backend.test/exec", json!({}), Duration::ZERO),
        invalidates: vec![InvalidationTag::resource("complaints")],
      })
      .await;

    assert!(matches!(result, Err(SyncError::Transport(_))));
    assert!(h.client.cache().is_fresh("complaints"));
    assert!(!h.client.monitor().is_online());
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_fetches_share_one_request() {
    let h = harness(FakeTransport::slow(json!("once"), Duration::from_millis(100)), true);
    let key = dashboard();

    let (a, b) = tokio::join!(
      h.client.fetch(&key, request(), FetchOptions::forced()),
      h.client.fetch(&key, request(), FetchOptions::forced())
    );

    assert_eq!(h.transport.calls(), 1);
    assert_eq!(a.unwrap(), b.unwrap());
  }

  #[tokio::test(start_paused = true)]
  async fn test_loading_flag_tracks_flight() {
    let h = harness(FakeTransport::slow(json!(1), Duration::from_millis(100)), true);
    let key = dashboard();

    let client = h.client.clone();
    let task_key = key.clone();
    let task = tokio::spawn(async move {
      client
        .fetch(&task_key, request(), FetchOptions::default())
        .await
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.client.status(&key).is_loading);
    assert!(h.client.is_fetching(&key));
    assert!(h.client.overall_status().is_loading);

    task.await.unwrap().unwrap();
    assert!(!h.client.status(&key).is_loading);
    assert!(!h.client.is_fetching(&key));
  }

  /// Panics on its first request, answers normally afterwards.
  struct PanicOnce {
    calls: std::sync::atomic::AtomicUsize,
  }

  impl Transport for PanicOnce {
    fn request(
      &self,
      _request: TransportRequest,
    ) -> futures::future::BoxFuture<'_, Result<crate::transport::TransportResponse, TransportError>>
    {
      let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
      Box::pin(async move {
        if call == 0 {
          panic!("transport blew up");
        }
        Ok(crate::transport::TransportResponse {
          status: 200,
          body: json!({"total": 1}),
        })
      })
    }
  }

  #[tokio::test]
  async fn test_panicked_fetch_does_not_wedge_key() {
    let clock = Arc::new(ManualClock::new(0));
    let cache = Arc::new(CacheStore::new(Arc::new(MemoryStorage::new()), clock.clone()));
    let monitor =
      NetworkMonitor::new(FakePinger::failing(), clock.clone(), MonitorConfig::default());
    let transport = Arc::new(PanicOnce {
      calls: std::sync::atomic::AtomicUsize::new(0),
    });
    let client = SyncClient::new(cache, monitor, transport.clone(), clock);
    let key = dashboard();

    let first = client.fetch(&key, request(), FetchOptions::default()).await;
    assert_eq!(first, Err(SyncError::Aborted("dashboard_stats".to_string())));
    assert!(!client.is_fetching(&key));
    let status = client.status(&key);
    assert!(!status.is_loading);
    assert!(status.error.is_some());

    let second = client.fetch(&key, request(), FetchOptions::default()).await.unwrap();
    assert_eq!(second.payload, json!({"total": 1}));
    assert_eq!(second.source, FetchSource::Network);
    assert_eq!(transport.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert!(!client.status(&key).is_loading);
  }
}
