//! Periodic and event-driven refresh on top of [`SyncClient`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::client::{FetchOptions, FetchOutcome, SyncClient};
use super::error::SyncError;
use super::key::ResourceKey;
use crate::network::{ConnectivitySignal, Transition};
use crate::timer::{Backoff, ScheduledTask};
use crate::transport::TransportRequest;

/// When a started resource gets refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOptions {
  /// Refresh on a fixed interval (skipped while offline)
  pub interval: Option<Duration>,
  /// Refresh when the app returns to the foreground
  pub refresh_on_foreground: bool,
  /// Refresh when connectivity comes back
  pub refresh_on_reconnect: bool,
  /// Fetch once as soon as the resource is started
  pub fetch_immediately: bool,
}

impl Default for ScheduleOptions {
  fn default() -> Self {
    Self {
      interval: Some(Duration::from_secs(5 * 60)),
      refresh_on_foreground: true,
      refresh_on_reconnect: true,
      fetch_immediately: true,
    }
  }
}

struct Registration {
  key: ResourceKey,
  request: TransportRequest,
  options: ScheduleOptions,
  tasks: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct RetryState {
  attempt: u32,
  task: Option<ScheduledTask>,
  generation: u64,
}

/// Drives refreshes for started resources and retries failed ones.
#[derive(Clone)]
pub struct SyncScheduler {
  client: SyncClient,
  registrations: Arc<Mutex<HashMap<String, Registration>>>,
  retries: Arc<Mutex<HashMap<String, RetryState>>>,
  retry_backoff: Backoff,
}

impl SyncScheduler {
  /// `max_retries` attempts are made after a failure, `retry_base * 2^n` apart.
  pub fn new(client: SyncClient, retry_base: Duration, max_retries: u32) -> Self {
    Self {
      client,
      registrations: Arc::new(Mutex::new(HashMap::new())),
      retries: Arc::new(Mutex::new(HashMap::new())),
      retry_backoff: Backoff::new(retry_base, max_retries),
    }
  }

  pub fn client(&self) -> &SyncClient {
    &self.client
  }

  /// Start refreshing `key`. Restarting a key replaces its previous triggers.
  pub fn start(&self, key: ResourceKey, request: TransportRequest, options: ScheduleOptions) {
    self.stop(&key);

    let mut tasks = Vec::new();

    if options.fetch_immediately {
      let scheduler = self.clone();
      let (key, request) = (key.clone(), request.clone());
      tasks.push(tokio::spawn(async move {
        let _ = scheduler.refresh(&key, &request, false).await;
      }));
    }

    if let Some(interval) = options.interval {
      tasks.push(self.spawn_interval(key.clone(), request.clone(), interval));
    }

    if options.refresh_on_reconnect {
      tasks.push(self.spawn_reconnect_trigger(key.clone(), request.clone()));
    }

    info!(key = %key, ?options, "sync started");
    self.registrations().insert(
      key.cache_key(),
      Registration {
        key,
        request,
        options,
        tasks,
      },
    );
  }

  /// Stop every trigger and pending retry for `key`.
  pub fn stop(&self, key: &ResourceKey) {
    let cache_key = key.cache_key();

    if let Some(registration) = self.registrations().remove(&cache_key) {
      for task in registration.tasks {
        task.abort();
      }
      debug!(key = %cache_key, "sync stopped");
    }

    if let Some(retry) = self.retries().remove(&cache_key) {
      if let Some(task) = retry.task {
        task.cancel();
      }
    }
  }

  /// Stop everything.
  pub fn shutdown(&self) {
    let keys: Vec<ResourceKey> = self
      .registrations()
      .values()
      .map(|r| r.key.clone())
      .collect();

    for key in &keys {
      self.stop(key);
    }
  }

  /// Keys currently started.
  pub fn started(&self) -> Vec<ResourceKey> {
    let mut keys: Vec<ResourceKey> = self
      .registrations()
      .values()
      .map(|r| r.key.clone())
      .collect();
    keys.sort();
    keys
  }

  /// Fetch a started resource, bypassing a fresh cache.
  pub async fn force_refresh(&self, key: &ResourceKey) -> Result<FetchOutcome, SyncError> {
    let request = self
      .registrations()
      .get(&key.cache_key())
      .map(|r| r.request.clone())
      .ok_or_else(|| SyncError::NotScheduled(key.cache_key()))?;

    self.refresh(key, &request, true).await
  }

  /// Refresh every started resource.
  pub async fn refresh_all(
    &self,
    force: bool,
  ) -> Vec<(ResourceKey, Result<FetchOutcome, SyncError>)> {
    let targets: Vec<(ResourceKey, TransportRequest)> = self
      .registrations()
      .values()
      .map(|r| (r.key.clone(), r.request.clone()))
      .collect();

    let refreshes = targets.into_iter().map(|(key, request)| async move {
      let result = self.refresh(&key, &request, force).await;
      (key, result)
    });

    futures::future::join_all(refreshes).await
  }

  /// Drop the whole cache, re-check connectivity, then force-refresh
  /// every started resource.
  pub async fn clear_and_refresh(&self) -> Vec<(ResourceKey, Result<FetchOutcome, SyncError>)> {
    info!("forcing data refresh");
    self.client.cache().clear_all();
    self.client.monitor().probe().await;
    self.refresh_all(true).await
  }

  /// Forward a platform signal to the network monitor and refresh any
  /// resources that asked for it.
  ///
  /// Nothing in this crate produces these signals; embedders feed them from
  /// their platform's connectivity and lifecycle events.
  pub async fn handle_signal(&self, signal: ConnectivitySignal) {
    self.client.monitor().handle_signal(signal).await;

    if signal != ConnectivitySignal::Foreground {
      return;
    }

    let targets: Vec<(ResourceKey, TransportRequest)> = self
      .registrations()
      .values()
      .filter(|r| r.options.refresh_on_foreground)
      .map(|r| (r.key.clone(), r.request.clone()))
      .collect();

    for (key, request) in targets {
      debug!(key = %key, "app foregrounded, refreshing");
      let scheduler = self.clone();
      tokio::spawn(async move {
        let _ = scheduler.refresh(&key, &request, false).await;
      });
    }
  }

  /// One fetch plus retry bookkeeping.
  pub async fn refresh(
    &self,
    key: &ResourceKey,
    request: &TransportRequest,
    force: bool,
  ) -> Result<FetchOutcome, SyncError> {
    let options = FetchOptions {
      force,
      ..FetchOptions::default()
    };
    let result = self.client.fetch(key, request.clone(), options).await;

    match &result {
      Ok(outcome) if outcome.warning.is_none() => self.reset_retries(key),
      _ => self.schedule_retry(key, request),
    }

    result
  }

  /// Number of retries used for `key` since its last success.
  pub fn retry_count(&self, key: &ResourceKey) -> u32 {
    self
      .retries()
      .get(&key.cache_key())
      .map(|r| r.attempt)
      .unwrap_or(0)
  }

  fn schedule_retry(&self, key: &ResourceKey, request: &TransportRequest) {
    let cache_key = key.cache_key();
    if !self.is_started(&cache_key) {
      debug!(key = %cache_key, "not started, no retry");
      return;
    }

    let mut retries = self.retries();
    let state = retries.entry(cache_key.clone()).or_default();

    if self.retry_backoff.exhausted(state.attempt) {
      warn!(key = %cache_key, attempts = state.attempt, "sync retries exhausted");
      return;
    }

    let delay = self.retry_backoff.delay(state.attempt);
    state.attempt += 1;
    state.generation += 1;
    if let Some(pending) = state.task.take() {
      pending.cancel();
    }

    let generation = state.generation;
    let scheduler = self.clone();
    let (retry_key, retry_request) = (key.clone(), request.clone());
    state.task = Some(ScheduledTask::spawn(delay, move || async move {
      scheduler.run_retry(retry_key, retry_request, generation).await;
    }));

    debug!(
      key = %cache_key,
      attempt = state.attempt,
      delay_ms = delay.as_millis() as u64,
      "sync retry scheduled"
    );
    let attempt = state.attempt;
    drop(retries);
    self.client.set_retry_count(key, attempt);
  }

  async fn run_retry(self, key: ResourceKey, request: TransportRequest, generation: u64) {
    {
      let mut retries = self.retries();
      match retries.get_mut(&key.cache_key()) {
        Some(state) if state.generation == generation => state.task = None,
        _ => return,
      }
    }

    if !self.is_started(&key.cache_key()) {
      return;
    }

    let _ = self.refresh(&key, &request, true).await;
  }

  fn reset_retries(&self, key: &ResourceKey) {
    if let Some(state) = self.retries().remove(&key.cache_key()) {
      if let Some(task) = state.task {
        task.cancel();
      }
      self.client.set_retry_count(key, 0);
    }
  }

  fn spawn_interval(
    &self,
    key: ResourceKey,
    request: TransportRequest,
    interval: Duration,
  ) -> JoinHandle<()> {
    let scheduler = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // First tick completes immediately
      ticker.tick().await;

      loop {
        ticker.tick().await;
        if !scheduler.client.monitor().is_online() {
          debug!(key = %key, "offline, skipping auto refresh");
          continue;
        }
        // Force when the cached entry would lapse before the next tick
        let force = scheduler
          .client
          .cache()
          .expires_within(&key.cache_key(), interval);
        debug!(key = %key, force, "auto refresh");
        let _ = scheduler.refresh(&key, &request, force).await;
      }
    })
  }

  fn spawn_reconnect_trigger(&self, key: ResourceKey, request: TransportRequest) -> JoinHandle<()> {
    let scheduler = self.clone();
    let mut transitions = self.client.monitor().subscribe();
    tokio::spawn(async move {
      loop {
        match transitions.recv().await {
          Ok(Transition::Online) => {
            info!(key = %key, "network back online, syncing");
            let _ = scheduler.refresh(&key, &request, false).await;
          }
          Ok(Transition::Offline) => {}
          Err(broadcast::error::RecvError::Lagged(_)) => continue,
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    })
  }

  fn is_started(&self, cache_key: &str) -> bool {
    self.registrations().contains_key(cache_key)
  }

  fn registrations(&self) -> MutexGuard<'_, HashMap<String, Registration>> {
    self.registrations.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn retries(&self) -> MutexGuard<'_, HashMap<String, RetryState>> {
    self.retries.lock().unwrap_or_else(|e| e.into_inner())
  }
}
