use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info};

use super::{ConnectivityEvent, ConnectivityState, Debouncer};

/// Whatever should run when connectivity comes back.
#[async_trait]
pub trait DrainTrigger: Send + Sync {
  async fn drain(&self);
}

/// Turns raw online/offline signals into debounced transitions.
///
/// Each stable `Offline -> Online` transition spawns exactly one
/// [`DrainTrigger::drain`] call.
pub struct ConnectivityMonitor {
  state: Arc<ConnectivityState>,
  debouncer: Debouncer,
  trigger: Option<Arc<dyn DrainTrigger>>,
  events: Option<mpsc::UnboundedSender<ConnectivityEvent>>,
}

impl ConnectivityMonitor {
  /// The starting state is whatever `state` holds right now.
  pub fn new(state: Arc<ConnectivityState>, quiet: Duration) -> Self {
    let debouncer = Debouncer::new(state.is_online(), quiet);
    Self {
      state,
      debouncer,
      trigger: None,
      events: None,
    }
  }

  pub fn with_trigger(mut self, trigger: Arc<dyn DrainTrigger>) -> Self {
    self.trigger = Some(trigger);
    self
  }

  /// Forward every transition to `tx` as well.
  pub fn with_events(mut self, tx: mpsc::UnboundedSender<ConnectivityEvent>) -> Self {
    self.events = Some(tx);
    self
  }

  /// Consume raw signals until the sender side closes.
  pub async fn run(mut self, mut signals: mpsc::Receiver<bool>) {
    loop {
      let wake = self.debouncer.deadline();
      // Disabled branches are still constructed, so give them a real instant
      let far = Instant::now() + Duration::from_secs(86_400);

      tokio::select! {
        signal = signals.recv() => match signal {
          Some(online) => self.debouncer.observe(online, Instant::now()),
          None => break,
        },
        _ = sleep_until(wake.unwrap_or(far)), if wake.is_some() => {
          if let Some(event) = self.debouncer.settle(Instant::now()) {
            self.apply(event);
          }
        }
      }
    }

    debug!("Connectivity signal source closed, monitor stopping");
  }

  fn apply(&self, event: ConnectivityEvent) {
    let online = event == ConnectivityEvent::BecameOnline;
    self.state.set_online(online);
    info!("Connectivity change: {:?}", event);

    if let Some(tx) = &self.events {
      let _ = tx.send(event);
    }

    if online {
      if let Some(trigger) = &self.trigger {
        let trigger = Arc::clone(trigger);
        tokio::spawn(async move {
          trigger.drain().await;
        });
      }
    }
  }
}
