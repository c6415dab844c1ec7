use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::backend::{BackendClient, EnvelopeTransport, Mutation, Resource};
use crate::cache::{CacheStats, CacheStore, DurableStore, MemoryStorage, SqliteStorage};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::network::{MonitorConfig, NetworkMonitor, NetworkStatus, Transition};
use crate::sync::{
  FetchOptions, FetchOutcome, ResourceKey, ScheduleOptions, StaticFallback, SyncClient,
  SyncError, SyncScheduler, SyncStatus,
};
use crate::transport::{HttpPinger, HttpTransport, Pinger, Transport};

/// How the app is started.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppOptions {
  /// Keep the durable tier in memory instead of SQLite
  pub ephemeral: bool,
  /// Assume no connectivity until a probe says otherwise
  pub start_offline: bool,
}

/// Collaborators the app is wired from.
pub struct Services {
  pub durable: Arc<dyn DurableStore>,
  pub transport: Arc<dyn Transport>,
  pub pinger: Arc<dyn Pinger>,
  pub clock: Arc<dyn Clock>,
  pub fallback: StaticFallback,
}

/// Everything `status` reports.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
  pub backend_url: String,
  pub network: NetworkStatus,
  pub cache: CacheStats,
  pub overall: SyncStatus,
  pub resources: BTreeMap<String, SyncStatus>,
}

/// Main application state
pub struct App {
  config: Config,
  backend: BackendClient,
  scheduler: SyncScheduler,
}

impl App {
  /// Wire the app against the real backend and storage.
  pub fn new(config: Config, options: AppOptions) -> Result<Self> {
    let backend = BackendClient::new(
      &config.backend,
      Config::get_api_token(),
      config.sync.fetch_timeout(),
    )?;

    let http = HttpTransport::new()?;
    let pinger = Arc::new(HttpPinger::new(&http, backend.health_url()));
    let transport = Arc::new(EnvelopeTransport::new(Arc::new(http)));

    let durable: Arc<dyn DurableStore> = if options.ephemeral {
      Arc::new(MemoryStorage::new())
    } else {
      Arc::new(SqliteStorage::open_at(&config.storage_path()?)?)
    };

    let services = Services {
      durable,
      transport,
      pinger,
      clock: Arc::new(SystemClock),
      fallback: StaticFallback::load(&config.fallback)?,
    };

    Ok(Self::with_services(config, backend, services, options))
  }

  pub fn with_services(
    config: Config,
    backend: BackendClient,
    services: Services,
    options: AppOptions,
  ) -> Self {
    let sync = &config.sync;

    let cache = CacheStore::new(services.durable, services.clock.clone())
      .with_default_ttl(sync.ttl());
    let monitor = NetworkMonitor::new(
      services.pinger,
      services.clock.clone(),
      MonitorConfig {
        base_reconnect_delay: sync.base_reconnect_delay(),
        max_reconnect_attempts: sync.max_reconnect_attempts,
        probe_timeout: sync.probe_timeout(),
        initially_online: !options.start_offline,
      },
    );
    let client = SyncClient::new(Arc::new(cache), monitor, services.transport, services.clock)
      .with_fallback(services.fallback)
      .with_fetch_timeout(sync.fetch_timeout());
    let scheduler = SyncScheduler::new(client, sync.retry_base_delay(), sync.max_retries);

    info!(backend = %backend.base_url(), "sync layer ready");

    Self {
      config,
      backend,
      scheduler,
    }
  }

  pub fn client(&self) -> &SyncClient {
    self.scheduler.client()
  }

  pub fn scheduler(&self) -> &SyncScheduler {
    &self.scheduler
  }

  /// Read `resource` through the cache.
  pub async fn fetch(&self, resource: &Resource, force: bool) -> Result<FetchOutcome, SyncError> {
    let options = FetchOptions {
      force,
      ..FetchOptions::default()
    };
    self
      .client()
      .fetch(&resource.key(), self.backend.request(resource), options)
      .await
  }

  /// Send `mutation` and drop the cache entries it makes stale.
  pub async fn mutate(&self, mutation: &Mutation) -> Result<Value, SyncError> {
    self.client().mutate(self.backend.mutation(mutation)).await
  }

  /// Probe connectivity, then snapshot network, cache and sync state.
  pub async fn status(&self) -> StatusReport {
    self.client().monitor().probe().await;
    self.report()
  }

  pub fn report(&self) -> StatusReport {
    let client = self.client();
    StatusReport {
      backend_url: self.backend.base_url().to_string(),
      network: client.monitor().current_status(),
      cache: client.cache().stats(),
      overall: client.overall_status(),
      resources: client.statuses(),
    }
  }

  pub fn clear(&self) {
    self.client().cache().clear_all();
  }

  /// Resources kept in sync when the caller names none.
  pub fn default_resources() -> Vec<Resource> {
    vec![Resource::complaints(), Resource::DashboardStats]
  }

  /// Drop the cache, re-check connectivity and force-refresh `resources`.
  pub async fn clear_and_refresh(
    &self,
    resources: &[Resource],
  ) -> Vec<(ResourceKey, Result<FetchOutcome, SyncError>)> {
    let manual = ScheduleOptions {
      interval: None,
      refresh_on_foreground: false,
      refresh_on_reconnect: false,
      fetch_immediately: false,
    };
    for resource in resources {
      self
        .scheduler
        .start(resource.key(), self.backend.request(resource), manual);
    }

    let results = self.scheduler.clear_and_refresh().await;
    self.scheduler.shutdown();
    results
  }

  /// Delete expired entries; returns how many went.
  pub fn sweep(&self) -> usize {
    self.client().cache().sweep_expired()
  }

  /// Start background refresh for `resources`.
  pub fn watch(&self, resources: &[Resource]) {
    let options = ScheduleOptions {
      interval: self.config.sync.auto_refresh_interval(),
      ..ScheduleOptions::default()
    };

    for resource in resources {
      self
        .scheduler
        .start(resource.key(), self.backend.request(resource), options);
    }
  }

  /// Watch `resources` until ctrl-c, printing connectivity transitions.
  pub async fn run_watch(&self, resources: &[Resource]) -> Result<()> {
    let _transitions = self.client().monitor().on_transition(|transition| match transition {
      Transition::Online => println!("network: online"),
      Transition::Offline => println!("network: offline"),
    });

    self.watch(resources);
    for resource in resources {
      println!("watching {}", resource.description());
    }

    tokio::signal::ctrl_c()
      .await
      .map_err(|e| eyre!("Failed to listen for ctrl-c: {}", e))?;

    self.scheduler.shutdown();
    Ok(())
  }
}
