//! Drains the pending-mutation queue against the server.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::saved::SavedDeals;
use crate::clock::Clock;
use crate::connectivity::{ConnectivityState, DrainTrigger};
use crate::deals::{DealsApi, RemoteError};
use crate::error::{Error, Result};

/// Why a sync call did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  /// No user id was supplied
  NoUser,
  /// Connectivity state says offline
  Offline,
  /// A pass for this user is already in flight
  AlreadySyncing,
}

/// Tally of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub user_id: String,
  /// Saves the server acknowledged
  pub synced: usize,
  /// Unsaves the server acknowledged
  pub deleted: usize,
  /// Items given up on after repeated rejections
  pub dropped: usize,
  /// Queue length after the pass
  pub still_pending: usize,
}

impl SyncReport {
  pub fn is_converged(&self) -> bool {
    self.still_pending == 0
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
  Skipped(SkipReason),
  Completed(SyncReport),
}

impl SyncOutcome {
  pub fn report(&self) -> Option<&SyncReport> {
    match self {
      SyncOutcome::Completed(report) => Some(report),
      SyncOutcome::Skipped(_) => None,
    }
  }
}

/// Marks a user as syncing for as long as it lives.
struct InFlightGuard<'a> {
  in_flight: &'a Mutex<HashSet<String>>,
  user_id: String,
}

impl<'a> InFlightGuard<'a> {
  /// Check-and-set under one lock; `None` if a pass is already running.
  fn acquire(in_flight: &'a Mutex<HashSet<String>>, user_id: &str) -> Option<Self> {
    let mut users = in_flight.lock().unwrap_or_else(|e| e.into_inner());
    if !users.insert(user_id.to_string()) {
      return None;
    }

    Some(Self {
      in_flight,
      user_id: user_id.to_string(),
    })
  }
}

impl Drop for InFlightGuard<'_> {
  fn drop(&mut self) {
    let mut users = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
    users.remove(&self.user_id);
  }
}

/// The only component that writes saved-deal state to the server.
///
/// Passes are best-effort: per-item failures stay queued for the next
/// trigger and never surface as errors. Only local storage failures do.
pub struct SyncOrchestrator {
  saved: Arc<SavedDeals>,
  remote: Arc<dyn DealsApi>,
  connectivity: Arc<ConnectivityState>,
  clock: Arc<dyn Clock>,
  in_flight: Mutex<HashSet<String>>,
  max_rejections: u32,
}

impl SyncOrchestrator {
  pub fn new(
    saved: Arc<SavedDeals>,
    remote: Arc<dyn DealsApi>,
    connectivity: Arc<ConnectivityState>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      saved,
      remote,
      connectivity,
      clock,
      in_flight: Mutex::new(HashSet::new()),
      max_rejections: 3,
    }
  }

  /// Rejections after which an item is dropped; 0 never drops.
  pub fn with_max_rejections(mut self, max_rejections: u32) -> Self {
    self.max_rejections = max_rejections;
    self
  }

  /// Whether any pass is running.
  pub fn is_syncing(&self) -> bool {
    !self
      .in_flight
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .is_empty()
  }

  pub fn is_syncing_user(&self, user_id: &str) -> bool {
    self
      .in_flight
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .contains(user_id)
  }

  /// Push `user_id`'s queued saves and unsaves to the server.
  ///
  /// Safe to call from any number of trigger points: without a user, while
  /// offline, or while a pass for the same user is running it returns
  /// [`SyncOutcome::Skipped`] and does nothing.
  pub async fn sync_saved_deals(&self, user_id: Option<&str>) -> Result<SyncOutcome> {
    let Some(user_id) = user_id.filter(|u| !u.is_empty()) else {
      return Ok(SyncOutcome::Skipped(SkipReason::NoUser));
    };

    if !self.connectivity.is_online() {
      debug!("Sync skipped for {}: offline", user_id);
      return Ok(SyncOutcome::Skipped(SkipReason::Offline));
    }

    let Some(_guard) = InFlightGuard::acquire(&self.in_flight, user_id) else {
      debug!("Sync already running for {}, dropping trigger", user_id);
      return Ok(SyncOutcome::Skipped(SkipReason::AlreadySyncing));
    };

    let result = self.run_pass(user_id).await;
    // An attempt happened, whether or not everything converged
    self.connectivity.record_sync(self.clock.now_ms());

    match &result {
      Ok(report) => info!(
        "Sync pass for {}: {} saved, {} deleted, {} dropped, {} pending",
        user_id, report.synced, report.deleted, report.dropped, report.still_pending
      ),
      Err(e) => warn!("Sync pass for {} aborted: {}", user_id, e),
    }

    result.map(SyncOutcome::Completed)
  }

  /// Sync every user with queued work. Users' queues are disjoint, so their
  /// passes run concurrently.
  pub async fn drain_all(&self) -> Result<Vec<SyncOutcome>> {
    let users = self.on_queue(|queue| queue.users_with_pending()).await?;
    if users.is_empty() {
      debug!("Nothing to sync");
    }

    let passes = users.iter().map(|u| self.sync_saved_deals(Some(u.as_str())));
    futures::future::join_all(passes)
      .await
      .into_iter()
      .collect()
  }

  fn should_drop(&self, rejections: u32) -> bool {
    self.max_rejections > 0 && rejections >= self.max_rejections
  }

  /// Run queue bookkeeping on the blocking pool; a durable write waits on fsync.
  async fn on_queue<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&SavedDeals) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    let saved = Arc::clone(&self.saved);
    tokio::task::spawn_blocking(move || f(&saved))
      .await
      .map_err(|e| Error::StorageUnavailable(format!("Queue task failed: {}", e)))?
  }

  async fn run_pass(&self, user_id: &str) -> Result<SyncReport> {
    let user = user_id.to_string();
    let (saves, deletions) = {
      let user = user.clone();
      self
        .on_queue(move |queue| Ok((queue.pending_saves(&user)?, queue.pending_deletions(&user)?)))
        .await?
    };
    debug!(
      "Syncing {}: {} saves, {} deletions queued",
      user_id,
      saves.len(),
      deletions.len()
    );

    let mut report = SyncReport {
      user_id: user.clone(),
      ..SyncReport::default()
    };

    for record in saves {
      let (id, revision) = (record.id, record.revision);
      match self.remote.save_deal_remote(user_id, &id).await {
        Ok(()) => {
          let now = self.clock.now_ms();
          let (u, i) = (user.clone(), id.clone());
          if self
            .on_queue(move |queue| queue.mark_synced(&u, &i, revision, now))
            .await?
          {
            report.synced += 1;
          } else {
            debug!("Deal {} changed during sync, leaving it queued", id);
          }
        }
        Err(RemoteError::Transient(e)) => {
          warn!("Save of deal {} for {} failed, will retry: {}", id, user_id, e);
        }
        Err(e) => {
          let (u, i) = (user.clone(), id.clone());
          let rejections = self
            .on_queue(move |queue| queue.record_save_rejection(&u, &i, revision))
            .await?;
          match rejections {
            Some(n) if self.should_drop(n) => {
              let (u, i) = (user.clone(), id.clone());
              if self
                .on_queue(move |queue| queue.drop_save(&u, &i, revision))
                .await?
              {
                warn!(
                  "Dropping save of deal {} for {} after {} rejections: {}",
                  id, user_id, n, e
                );
                report.dropped += 1;
              }
            }
            _ => warn!("Save of deal {} for {} rejected: {}", id, user_id, e),
          }
        }
      }
    }

    for deletion in deletions {
      let id = deletion.id;
      match self.remote.unsave_deal_remote(user_id, &id).await {
        Ok(()) => {
          let (u, i) = (user.clone(), id.clone());
          self
            .on_queue(move |queue| queue.clear_deletion(&u, &i))
            .await?;
          report.deleted += 1;
        }
        Err(RemoteError::Transient(e)) => {
          warn!("Unsave of deal {} for {} failed, will retry: {}", id, user_id, e);
        }
        Err(e) => {
          let (u, i) = (user.clone(), id.clone());
          let rejections = self
            .on_queue(move |queue| queue.record_deletion_rejection(&u, &i))
            .await?;
          match rejections {
            Some(n) if self.should_drop(n) => {
              warn!(
                "Dropping unsave of deal {} for {} after {} rejections: {}",
                id, user_id, n, e
              );
              let (u, i) = (user.clone(), id.clone());
              self
                .on_queue(move |queue| queue.clear_deletion(&u, &i))
                .await?;
              report.dropped += 1;
            }
            _ => warn!("Unsave of deal {} for {} rejected: {}", id, user_id, e),
          }
        }
      }
    }

    report.still_pending = self
      .on_queue(move |queue| queue.pending_count(&user))
      .await?;
    Ok(report)
  }
}

#[async_trait]
impl DrainTrigger for SyncOrchestrator {
  async fn drain(&self) {
    match self.drain_all().await {
      Ok(outcomes) => debug!("Drain finished, {} users visited", outcomes.len()),
      Err(e) => warn!("Drain failed: {}", e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::deals::{Deal, DealId};
  use crate::store::MemoryStore;
  use crate::testing::FakeApi;

  struct Harness {
    saved: Arc<SavedDeals>,
    api: Arc<FakeApi>,
    state: Arc<ConnectivityState>,
    clock: Arc<ManualClock>,
    orchestrator: Arc<SyncOrchestrator>,
  }

  fn harness(online: bool) -> Harness {
    let clock = Arc::new(ManualClock::new(1_000));
    let saved = Arc::new(SavedDeals::new(Arc::new(MemoryStore::new()), clock.clone()));
    let api = Arc::new(FakeApi::new());
    let state = Arc::new(ConnectivityState::new(online));
    let orchestrator = Arc::new(
      SyncOrchestrator::new(saved.clone(), api.clone(), state.clone(), clock.clone())
        .with_max_rejections(2),
    );

    Harness {
      saved,
      api,
      state,
      clock,
      orchestrator,
    }
  }

  fn rejected(status: u16) -> RemoteError {
    RemoteError::Rejected {
      status,
      message: "nope".to_string(),
    }
  }

  #[tokio::test]
  async fn test_no_user_is_noop() {
    let h = harness(true);
    h.saved.save(&Deal::new(1u64), "u1").unwrap();

    for user in [None, Some("")] {
      let outcome = h.orchestrator.sync_saved_deals(user).await.unwrap();
      assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::NoUser));
    }
    assert_eq!(h.api.save_count(), 0);
  }

  #[tokio::test]
  async fn test_offline_is_noop() {
    let h = harness(false);
    h.saved.save(&Deal::new(1u64), "u1").unwrap();

    let outcome = h.orchestrator.sync_saved_deals(Some("u1")).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::Offline));
    assert_eq!(h.api.save_count(), 0);
    assert_eq!(h.state.last_sync_at(), None);
  }

  #[tokio::test]
  async fn test_offline_save_then_online_syncs_once() {
    let h = harness(false);
    h.saved.save(&Deal::new(42u64), "u1").unwrap();
    let pending = h.saved.list("u1").unwrap();
    assert_eq!(pending[0].synced_at, None);

    h.state.set_online(true);
    h.clock.set(2_000);
    let outcome = h.orchestrator.sync_saved_deals(Some("u1")).await.unwrap();

    let report = outcome.report().unwrap();
    assert_eq!(report.synced, 1);
    assert!(report.is_converged());
    assert_eq!(
      *h.api.saves.lock().unwrap(),
      vec![("u1".to_string(), DealId::from(42u64))]
    );
    assert_eq!(h.saved.list("u1").unwrap()[0].synced_at, Some(2_000));
    assert_eq!(h.state.last_sync_at(), Some(2_000));

    // Nothing left to send
    h.orchestrator.sync_saved_deals(Some("u1")).await.unwrap();
    assert_eq!(h.api.save_count(), 1);
  }

  #[tokio::test]
  async fn test_unsave_propagates() {
    let h = harness(true);
    let id = DealId::from(5u64);
    h.saved.save(&Deal::new(5u64), "u1").unwrap();
    h.saved.remove(&id, "u1").unwrap();

    let outcome = h.orchestrator.sync_saved_deals(Some("u1")).await.unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(h.api.save_count(), 0);
    assert_eq!(h.api.unsave_count(), 1);
    assert!(h.saved.pending_deletions("u1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_transient_failure_stays_queued_and_batch_continues() {
    let h = harness(true);
    h.saved.save(&Deal::new(1u64), "u1").unwrap();
    h.saved.save(&Deal::new(2u64), "u1").unwrap();
    h.api
      .fail_save(1u64, RemoteError::Transient("502 Bad Gateway".into()));

    let outcome = h.orchestrator.sync_saved_deals(Some("u1")).await.unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.still_pending, 1);
    assert_eq!(h.api.save_count(), 2);
    // lastSyncAt records the attempt even though it did not converge
    assert!(h.state.last_sync_at().is_some());

    h.api.heal();
    let outcome = h.orchestrator.sync_saved_deals(Some("u1")).await.unwrap();
    assert!(outcome.report().unwrap().is_converged());
  }

  #[tokio::test]
  async fn test_transient_failures_never_drop() {
    let h = harness(true);
    h.saved.save(&Deal::new(1u64), "u1").unwrap();
    h.api.set_offline(true);

    for _ in 0..5 {
      h.orchestrator.sync_saved_deals(Some("u1")).await.unwrap();
    }
    assert_eq!(h.saved.pending_count("u1").unwrap(), 1);
  }

  #[tokio::test]
  async fn test_repeated_rejections_drop_item() {
    let h = harness(true);
    let id = DealId::from(9u64);
    h.saved.save(&Deal::new(9u64), "u1").unwrap();
    h.api.fail_save(9u64, rejected(404));

    let first = h.orchestrator.sync_saved_deals(Some("u1")).await.unwrap();
    assert_eq!(first.report().unwrap().dropped, 0);
    assert!(h.saved.is_saved(&id, "u1").unwrap());

    let second = h.orchestrator.sync_saved_deals(Some("u1")).await.unwrap();
    assert_eq!(second.report().unwrap().dropped, 1);
    assert!(!h.saved.is_saved(&id, "u1").unwrap());
    assert_eq!(h.saved.pending_count("u1").unwrap(), 0);
  }

  #[tokio::test]
  async fn test_rejected_unsave_dropped_after_limit() {
    let h = harness(true);
    let id = DealId::from(3u64);
    h.saved.remove(&id, "u1").unwrap();
    h.api.fail_unsave(3u64, rejected(403));

    h.orchestrator.sync_saved_deals(Some("u1")).await.unwrap();
    assert_eq!(h.saved.pending_deletions("u1").unwrap().len(), 1);
    h.orchestrator.sync_saved_deals(Some("u1")).await.unwrap();
    assert!(h.saved.pending_deletions("u1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_zero_max_rejections_keeps_items() {
    let clock = Arc::new(ManualClock::new(0));
    let saved = Arc::new(SavedDeals::new(Arc::new(MemoryStore::new()), clock.clone()));
    let api = Arc::new(FakeApi::new());
    let orchestrator = SyncOrchestrator::new(
      saved.clone(),
      api.clone(),
      Arc::new(ConnectivityState::new(true)),
      clock,
    )
    .with_max_rejections(0);

    saved.save(&Deal::new(1u64), "u1").unwrap();
    api.fail_save(1u64, rejected(422));
    for _ in 0..10 {
      orchestrator.sync_saved_deals(Some("u1")).await.unwrap();
    }
    assert_eq!(saved.pending_count("u1").unwrap(), 1);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_pass_against_durable_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(crate::store::SqliteStore::open(&dir.path().join("store.db")).unwrap());
    let clock = Arc::new(ManualClock::new(7));
    let saved = Arc::new(SavedDeals::new(store, clock.clone()));
    let api = Arc::new(FakeApi::new());
    let orchestrator = SyncOrchestrator::new(
      saved.clone(),
      api.clone(),
      Arc::new(ConnectivityState::new(true)),
      clock,
    );

    saved.save(&Deal::new(1u64), "u1").unwrap();
    saved.remove(&DealId::from(2u64), "u1").unwrap();

    let report = orchestrator.drain_all().await.unwrap();
    let report = report[0].report().unwrap();
    assert_eq!((report.synced, report.deleted), (1, 1));
    assert!(report.is_converged());
    assert_eq!(saved.list("u1").unwrap()[0].synced_at, Some(7));
  }

  #[tokio::test]
  async fn test_concurrent_trigger_is_dropped() {
    let h = harness(true);
    h.saved.save(&Deal::new(1u64), "u1").unwrap();
    h.api.hold_saves();

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.sync_saved_deals(Some("u1")).await });

    h.api.wait_parked(1).await;
    assert!(h.orchestrator.is_syncing_user("u1"));
    assert!(h.orchestrator.is_syncing());

    let second = h.orchestrator.sync_saved_deals(Some("u1")).await.unwrap();
    assert_eq!(second, SyncOutcome::Skipped(SkipReason::AlreadySyncing));

    h.api.release_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.report().unwrap().synced, 1);
    assert_eq!(h.api.save_count(), 1);
    assert!(!h.orchestrator.is_syncing());
  }

  #[tokio::test]
  async fn test_resave_during_pass_stays_dirty() {
    let h = harness(true);
    h.saved.save(&Deal::new(1u64).with_title("v1"), "u1").unwrap();
    h.api.hold_saves();

    let orchestrator = h.orchestrator.clone();
    let pass = tokio::spawn(async move { orchestrator.sync_saved_deals(Some("u1")).await });
    h.api.wait_parked(1).await;

    h.saved.save(&Deal::new(1u64).with_title("v2"), "u1").unwrap();
    h.api.release_one();
    let report = pass.await.unwrap().unwrap();
    assert_eq!(report.report().unwrap().synced, 0);
    assert_eq!(h.saved.pending_saves("u1").unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_drain_all_visits_each_pending_user() {
    let h = harness(true);
    h.saved.save(&Deal::new(1u64), "u1").unwrap();
    h.saved.save(&Deal::new(2u64), "u2").unwrap();
    h.saved.remove(&DealId::from(3u64), "u3").unwrap();

    let outcomes = h.orchestrator.drain_all().await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(h.api.save_count(), 2);
    assert_eq!(h.api.unsave_count(), 1);
    assert!(h.saved.users_with_pending().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_drain_trigger_syncs() {
    let h = harness(true);
    h.saved.save(&Deal::new(1u64), "u1").unwrap();

    let trigger: Arc<dyn DrainTrigger> = h.orchestrator.clone();
    trigger.drain().await;
    assert_eq!(h.api.save_count(), 1);
  }
}
