//! Network monitor with backoff-driven reconnection.
//!
//! State machine:
//!
//! ```text
//! Online --loss--> Offline --reconnect loop (bounded)--> Online
//!                                                    \-> GivenUp
//! GivenUp --external online signal--> Offline (attempts reset, loop re-entered)
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ConnectivitySignal, NetworkStatus, Transition};
use crate::clock::Clock;
use crate::timer::{Backoff, ScheduledTask};
use crate::transport::{with_timeout, Pinger};

/// Reconnect and probe settings.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
  pub base_reconnect_delay: Duration,
  pub max_reconnect_attempts: u32,
  pub probe_timeout: Duration,
  /// Connectivity belief before the first probe
  pub initially_online: bool,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      base_reconnect_delay: Duration::from_secs(2),
      max_reconnect_attempts: 5,
      probe_timeout: Duration::from_secs(5),
      initially_online: true,
    }
  }
}

struct State {
  is_online: bool,
  last_online_at: Option<chrono::DateTime<chrono::Utc>>,
  reconnect_attempts: u32,
  given_up: bool,
}

#[derive(Default)]
struct Reconnect {
  task: Option<ScheduledTask>,
  /// Bumped on every schedule/cancel so a superseded task can tell it lost
  generation: u64,
}

/// Tracks connectivity and runs the reconnect probe loop.
pub struct NetworkMonitor {
  state: Mutex<State>,
  reconnect: Mutex<Reconnect>,
  pinger: Arc<dyn Pinger>,
  clock: Arc<dyn Clock>,
  backoff: Backoff,
  probe_timeout: Duration,
  transitions: broadcast::Sender<Transition>,
}

impl NetworkMonitor {
  pub fn new(pinger: Arc<dyn Pinger>, clock: Arc<dyn Clock>, config: MonitorConfig) -> Arc<Self> {
    let (transitions, _) = broadcast::channel(64);
    let last_online_at = config.initially_online.then(|| clock.now());

    Arc::new(Self {
      state: Mutex::new(State {
        is_online: config.initially_online,
        last_online_at,
        reconnect_attempts: 0,
        given_up: false,
      }),
      reconnect: Mutex::new(Reconnect::default()),
      pinger,
      clock,
      backoff: Backoff::new(config.base_reconnect_delay, config.max_reconnect_attempts),
      probe_timeout: config.probe_timeout,
      transitions,
    })
  }

  /// Point-in-time snapshot.
  pub fn current_status(&self) -> NetworkStatus {
    let reconnect_scheduled = self.reconnect().task.is_some();
    let state = self.state();

    NetworkStatus {
      is_online: state.is_online,
      last_online_at: state.last_online_at,
      reconnect_attempts: state.reconnect_attempts,
      reconnect_scheduled,
      given_up: state.given_up,
    }
  }

  pub fn is_online(&self) -> bool {
    self.state().is_online
  }

  /// Delay the next reconnect probe would be scheduled with.
  pub fn next_reconnect_delay(&self) -> Duration {
    self.backoff.delay(self.state().reconnect_attempts)
  }

  /// One bounded-timeout connectivity check. Updates status and returns the verdict.
  pub async fn probe(&self) -> bool {
    let online = self.ping().await;
    if online {
      self.mark_online();
    } else {
      self.mark_offline();
    }
    online
  }

  /// Receive every online/offline flip, in order.
  pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
    self.transitions.subscribe()
  }

  /// Invoke `listener` on every online/offline flip until the returned
  /// handle is dropped or unsubscribed.
  pub fn on_transition<F>(&self, mut listener: F) -> Subscription
  where
    F: FnMut(Transition) + Send + 'static,
  {
    let mut rx = self.subscribe();
    let handle = tokio::spawn(async move {
      loop {
        match rx.recv().await {
          Ok(transition) => listener(transition),
          Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "transition listener lagged");
          }
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    });

    Subscription { handle }
  }

  /// Record confirmed connectivity: cancel any pending probe, reset attempts.
  pub fn mark_online(&self) {
    self.cancel_reconnect();

    let mut state = self.state();
    let was_online = state.is_online;
    state.is_online = true;
    state.last_online_at = Some(self.clock.now());
    state.reconnect_attempts = 0;
    state.given_up = false;

    if !was_online {
      info!("network connection restored");
      let _ = self.transitions.send(Transition::Online);
    }
  }

  /// Record lost connectivity.
  pub fn mark_offline(&self) {
    let mut state = self.state();
    if state.is_online {
      state.is_online = false;
      info!("network connection lost, switching to offline mode");
      let _ = self.transitions.send(Transition::Offline);
    }
  }

  /// Schedule one reconnect probe if offline and none is pending.
  ///
  /// Returns whether a new probe was scheduled.
  pub fn schedule_reconnect(self: &Arc<Self>) -> bool {
    let mut reconnect = self.reconnect();
    if reconnect.task.is_some() {
      return false;
    }

    let attempts = {
      let mut state = self.state();
      if state.is_online {
        return false;
      }
      if self.backoff.exhausted(state.reconnect_attempts) {
        if !state.given_up {
          warn!(
            attempts = state.reconnect_attempts,
            "giving up on reconnect until connectivity is signalled"
          );
        }
        state.given_up = true;
        return false;
      }
      state.reconnect_attempts
    };

    let delay = self.backoff.delay(attempts);
    reconnect.generation += 1;
    let generation = reconnect.generation;

    let monitor = Arc::clone(self);
    reconnect.task = Some(ScheduledTask::spawn(delay, move || async move {
      monitor.run_reconnect(generation).await;
    }));

    info!(
      attempt = attempts + 1,
      max = self.backoff.max_attempts(),
      delay_ms = delay.as_millis() as u64,
      "reconnect probe scheduled"
    );
    true
  }

  /// React to a platform signal.
  pub async fn handle_signal(self: &Arc<Self>, signal: ConnectivitySignal) {
    debug!(?signal, "connectivity signal");
    match signal {
      ConnectivitySignal::Online => {
        self.cancel_reconnect();
        {
          let mut state = self.state();
          state.reconnect_attempts = 0;
          state.given_up = false;
        }
        if !self.probe().await {
          self.schedule_reconnect();
        }
      }
      ConnectivitySignal::Offline => self.mark_offline(),
      ConnectivitySignal::Foreground => {
        if !self.probe().await {
          self.schedule_reconnect();
        }
      }
    }
  }

  async fn run_reconnect(self: Arc<Self>, generation: u64) {
    let online = self.ping().await;

    {
      let mut reconnect = self.reconnect();
      if reconnect.generation != generation {
        // Cancelled or superseded while the probe was in flight
        return;
      }
      reconnect.task = None;
    }

    if online {
      self.mark_online();
      return;
    }

    {
      let mut state = self.state();
      state.reconnect_attempts += 1;
      debug!(attempts = state.reconnect_attempts, "reconnect probe failed");
    }
    self.schedule_reconnect();
  }

  async fn ping(&self) -> bool {
    match with_timeout(self.probe_timeout, self.pinger.ping(self.probe_timeout)).await {
      Ok(()) => true,
      Err(e) => {
        debug!(error = %e, "connectivity probe failed");
        false
      }
    }
  }

  fn cancel_reconnect(&self) {
    let mut reconnect = self.reconnect();
    reconnect.generation += 1;
    if let Some(task) = reconnect.task.take() {
      task.cancel();
    }
  }

  fn state(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn reconnect(&self) -> MutexGuard<'_, Reconnect> {
    self.reconnect.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Handle for a transition listener; dropping it stops delivery.
#[derive(Debug)]
pub struct Subscription {
  handle: JoinHandle<()>,
}

impl Subscription {
  pub fn unsubscribe(self) {
    self.handle.abort();
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.handle.abort();
  }
}
