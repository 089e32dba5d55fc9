//! Online/offline awareness.
//!
//! [`ConnectivityState`] is an explicitly owned context object: construct one,
//! share it through an `Arc`, and hand it to the monitor and orchestrator.

mod debounce;
mod monitor;
mod probe;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;

use crate::clock::Millis;

pub use debounce::Debouncer;
pub use monitor::{ConnectivityMonitor, DrainTrigger};
pub use probe::{spawn_probe, HttpProbe};

/// A stable connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
  BecameOnline,
  BecameOffline,
}

/// Point-in-time view for UI indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectivitySnapshot {
  pub is_online: bool,
  pub last_sync_at: Option<Millis>,
}

/// Process-wide connectivity state.
///
/// `is_online` is written by the monitor (or a one-shot probe), `last_sync_at`
/// by the orchestrator after each pass.
#[derive(Debug)]
pub struct ConnectivityState {
  online: AtomicBool,
  last_sync_at: Mutex<Option<Millis>>,
  snapshot_tx: watch::Sender<ConnectivitySnapshot>,
}

impl ConnectivityState {
  pub fn new(initially_online: bool) -> Self {
    let (snapshot_tx, _) = watch::channel(ConnectivitySnapshot {
      is_online: initially_online,
      last_sync_at: None,
    });

    Self {
      online: AtomicBool::new(initially_online),
      last_sync_at: Mutex::new(None),
      snapshot_tx,
    }
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  pub fn last_sync_at(&self) -> Option<Millis> {
    self.last_sync_at.lock().map(|t| *t).unwrap_or(None)
  }

  /// Set the online flag, returning the previous value.
  pub fn set_online(&self, online: bool) -> bool {
    let previous = self.online.swap(online, Ordering::SeqCst);
    if previous != online {
      self.publish();
    }
    previous
  }

  /// Note that a sync attempt finished at `at`.
  pub fn record_sync(&self, at: Millis) {
    if let Ok(mut last) = self.last_sync_at.lock() {
      *last = Some(at);
    }
    self.publish();
  }

  pub fn snapshot(&self) -> ConnectivitySnapshot {
    ConnectivitySnapshot {
      is_online: self.is_online(),
      last_sync_at: self.last_sync_at(),
    }
  }

  /// Receive a fresh snapshot on every change.
  pub fn subscribe(&self) -> watch::Receiver<ConnectivitySnapshot> {
    self.snapshot_tx.subscribe()
  }

  fn publish(&self) {
    self.snapshot_tx.send_replace(self.snapshot());
  }
}

impl Default for ConnectivityState {
  fn default() -> Self {
    Self::new(false)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_set_online_returns_previous() {
    let state = ConnectivityState::new(false);
    assert!(!state.set_online(true));
    assert!(state.set_online(true));
    assert!(state.is_online());
  }

  #[test]
  fn test_subscribers_see_changes() {
    let state = ConnectivityState::new(false);
    let mut rx = state.subscribe();
    assert!(!rx.borrow_and_update().is_online);

    state.set_online(true);
    assert!(rx.has_changed().unwrap());
    assert!(rx.borrow_and_update().is_online);

    state.record_sync(1234);
    assert_eq!(rx.borrow_and_update().last_sync_at, Some(1234));
    assert_eq!(state.last_sync_at(), Some(1234));
  }
}
