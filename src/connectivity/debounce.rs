use tokio::time::{Duration, Instant};

use super::ConnectivityEvent;

/// Two-state debouncer for raw online/offline signals.
///
/// A raw change only becomes a transition after it has held for the quiet
/// period. Flapping back to the stable state inside the window cancels it.
#[derive(Debug, Clone)]
pub struct Debouncer {
  stable: bool,
  last_raw: bool,
  pending_until: Option<Instant>,
  quiet: Duration,
}

impl Debouncer {
  pub fn new(initially_online: bool, quiet: Duration) -> Self {
    Self {
      stable: initially_online,
      last_raw: initially_online,
      pending_until: None,
      quiet,
    }
  }

  pub fn is_online(&self) -> bool {
    self.stable
  }

  /// When the pending change (if any) becomes stable.
  pub fn deadline(&self) -> Option<Instant> {
    self.pending_until
  }

  /// Feed one raw signal observed at `now`.
  pub fn observe(&mut self, online: bool, now: Instant) {
    if online == self.last_raw {
      return;
    }
    self.last_raw = online;

    self.pending_until = if online == self.stable {
      None
    } else {
      Some(now + self.quiet)
    };
  }

  /// Commit the pending change if its quiet period has elapsed by `now`.
  pub fn settle(&mut self, now: Instant) -> Option<ConnectivityEvent> {
    match self.pending_until {
      Some(deadline) if deadline <= now => {
        self.pending_until = None;
        self.stable = self.last_raw;
        Some(if self.stable {
          ConnectivityEvent::BecameOnline
        } else {
          ConnectivityEvent::BecameOffline
        })
      }
      _ => None,
    }
  }
}
