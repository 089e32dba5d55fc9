//! Wall-clock abstraction.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// Source of the current time for TTL and sync bookkeeping.
pub trait Clock: Send + Sync {
  fn now_ms(&self) -> Millis;
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_ms(&self) -> Millis {
    Utc::now().timestamp_millis()
  }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
  now: AtomicI64,
}

impl ManualClock {
  pub fn new(start: Millis) -> Self {
    Self {
      now: AtomicI64::new(start),
    }
  }

  pub fn set(&self, now: Millis) {
    self.now.store(now, Ordering::SeqCst);
  }

  pub fn advance(&self, by: Millis) {
    self.now.fetch_add(by, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now_ms(&self) -> Millis {
    self.now.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_moves_only_on_request() {
    let clock = ManualClock::new(10);
    assert_eq!(clock.now_ms(), 10);
    clock.advance(5);
    assert_eq!(clock.now_ms(), 15);
    clock.set(0);
    assert_eq!(clock.now_ms(), 0);
  }
}
