//! Saved-deal records and the pending-mutation queue.
//!
//! A saved record with `synced_at == None` is a pending save; a
//! [`PendingDeletion`] is a pending unsave. Both are keyed by `(user, deal)`,
//! so the queue holds at most one op per deal and the latest local write wins.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::clock::{Clock, Millis};
use crate::deals::{Deal, DealId};
use crate::error::Result;
use crate::store::{self, keys, LocalStore, WriteOp};

/// A deal the user saved, with its sync status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedDealRecord {
  pub id: DealId,
  pub user_id: String,
  pub deal_snapshot: Deal,
  pub saved_at: Millis,
  #[serde(default)]
  pub synced_at: Option<Millis>,
  /// Bumped on every local save so a sync result for an older snapshot
  /// cannot mark a newer one clean.
  #[serde(default)]
  pub revision: u64,
  /// Non-retryable server rejections seen for this revision
  #[serde(default)]
  pub rejections: u32,
}

impl SavedDealRecord {
  pub fn is_pending(&self) -> bool {
    self.synced_at.is_none()
  }
}

/// A local unsave the server has not acknowledged yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDeletion {
  pub id: DealId,
  pub user_id: String,
  pub queued_at: Millis,
  #[serde(default)]
  pub rejections: u32,
}

/// Sole writer of the saved-deal and pending-deletion families.
pub struct SavedDeals {
  store: Arc<dyn LocalStore>,
  clock: Arc<dyn Clock>,
  // Serializes read-modify-write sequences against the store
  write_lock: Mutex<()>,
}

impl SavedDeals {
  pub fn new(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      clock,
      write_lock: Mutex::new(()),
    }
  }

  fn record(&self, user_id: &str, deal_id: &DealId) -> Result<Option<SavedDealRecord>> {
    store::get_json(self.store.as_ref(), &keys::saved(user_id, deal_id.as_str()))
  }

  fn deletion(&self, user_id: &str, deal_id: &DealId) -> Result<Option<PendingDeletion>> {
    store::get_json(self.store.as_ref(), &keys::deletion(user_id, deal_id.as_str()))
  }

  /// Save (or re-save) `deal` for `user_id`. The record becomes pending and
  /// any queued unsave for the same deal is cancelled.
  pub fn save(&self, deal: &Deal, user_id: &str) -> Result<SavedDealRecord> {
    let _guard = self.write_lock.lock()?;

    let revision = self
      .record(user_id, &deal.id)?
      .map(|r| r.revision + 1)
      .unwrap_or(0);

    let record = SavedDealRecord {
      id: deal.id.clone(),
      user_id: user_id.to_string(),
      deal_snapshot: deal.clone(),
      saved_at: self.clock.now_ms(),
      synced_at: None,
      revision,
      rejections: 0,
    };

    self.store.apply(&[
      WriteOp::set_json(keys::saved(user_id, deal.id.as_str()), &record)?,
      WriteOp::delete(keys::deletion(user_id, deal.id.as_str())),
    ])?;

    Ok(record)
  }

  /// Remove the saved deal locally and queue the unsave for the server.
  pub fn remove(&self, deal_id: &DealId, user_id: &str) -> Result<PendingDeletion> {
    let _guard = self.write_lock.lock()?;

    let deletion = PendingDeletion {
      id: deal_id.clone(),
      user_id: user_id.to_string(),
      queued_at: self.clock.now_ms(),
      rejections: 0,
    };

    self.store.apply(&[
      WriteOp::delete(keys::saved(user_id, deal_id.as_str())),
      WriteOp::set_json(keys::deletion(user_id, deal_id.as_str()), &deletion)?,
    ])?;

    Ok(deletion)
  }

  /// Every saved deal for `user_id`, most recently saved first.
  pub fn list(&self, user_id: &str) -> Result<Vec<SavedDealRecord>> {
    let mut records: Vec<SavedDealRecord> =
      store::list_json(self.store.as_ref(), &keys::saved_prefix(user_id))?;
    records.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
    Ok(records)
  }

  pub fn is_saved(&self, deal_id: &DealId, user_id: &str) -> Result<bool> {
    Ok(self.record(user_id, deal_id)?.is_some())
  }

  /// Saved records not yet acknowledged by the server, oldest first.
  pub fn pending_saves(&self, user_id: &str) -> Result<Vec<SavedDealRecord>> {
    let mut pending: Vec<SavedDealRecord> = self
      .list(user_id)?
      .into_iter()
      .filter(SavedDealRecord::is_pending)
      .collect();
    pending.reverse();
    Ok(pending)
  }

  /// Queued unsaves, oldest first.
  pub fn pending_deletions(&self, user_id: &str) -> Result<Vec<PendingDeletion>> {
    let mut pending: Vec<PendingDeletion> =
      store::list_json(self.store.as_ref(), &keys::deletion_prefix(user_id))?;
    pending.sort_by_key(|d| d.queued_at);
    Ok(pending)
  }

  /// Number of queued ops (saves plus unsaves) for `user_id`.
  pub fn pending_count(&self, user_id: &str) -> Result<usize> {
    Ok(self.pending_saves(user_id)?.len() + self.pending_deletions(user_id)?.len())
  }

  /// Users with at least one queued op.
  pub fn users_with_pending(&self) -> Result<BTreeSet<String>> {
    let mut users = BTreeSet::new();

    let saves: Vec<SavedDealRecord> = store::list_json(self.store.as_ref(), keys::SAVED_PREFIX)?;
    users.extend(
      saves
        .into_iter()
        .filter(SavedDealRecord::is_pending)
        .map(|r| r.user_id),
    );

    let deletions: Vec<PendingDeletion> =
      store::list_json(self.store.as_ref(), keys::DELETION_PREFIX)?;
    users.extend(deletions.into_iter().map(|d| d.user_id));

    Ok(users)
  }

  /// Mark the save clean, provided the stored record is still `revision`.
  /// Returns whether the record was updated.
  pub fn mark_synced(
    &self,
    user_id: &str,
    deal_id: &DealId,
    revision: u64,
    at: Millis,
  ) -> Result<bool> {
    let _guard = self.write_lock.lock()?;

    match self.record(user_id, deal_id)? {
      Some(mut record) if record.revision == revision => {
        record.synced_at = Some(at);
        record.rejections = 0;
        store::set_json(
          self.store.as_ref(),
          &keys::saved(user_id, deal_id.as_str()),
          &record,
        )?;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  /// Count a rejection against a pending save. Returns the new count, or
  /// `None` if the record moved on (re-saved or removed) in the meantime.
  pub fn record_save_rejection(
    &self,
    user_id: &str,
    deal_id: &DealId,
    revision: u64,
  ) -> Result<Option<u32>> {
    let _guard = self.write_lock.lock()?;

    match self.record(user_id, deal_id)? {
      Some(mut record) if record.revision == revision => {
        record.rejections += 1;
        store::set_json(
          self.store.as_ref(),
          &keys::saved(user_id, deal_id.as_str()),
          &record,
        )?;
        Ok(Some(record.rejections))
      }
      _ => Ok(None),
    }
  }

  /// Give up on a save the server keeps rejecting: the local record goes too,
  /// since the server will never hold it.
  pub fn drop_save(&self, user_id: &str, deal_id: &DealId, revision: u64) -> Result<bool> {
    let _guard = self.write_lock.lock()?;

    match self.record(user_id, deal_id)? {
      Some(record) if record.revision == revision => {
        self.store.delete(&keys::saved(user_id, deal_id.as_str()))?;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  /// Remove the unsave marker once the server has acknowledged it (or it has
  /// been given up on).
  pub fn clear_deletion(&self, user_id: &str, deal_id: &DealId) -> Result<()> {
    let _guard = self.write_lock.lock()?;
    self.store.delete(&keys::deletion(user_id, deal_id.as_str()))
  }

  /// Count a rejection against a pending unsave. Returns the new count, or
  /// `None` if the marker is gone (the deal was saved again).
  pub fn record_deletion_rejection(&self, user_id: &str, deal_id: &DealId) -> Result<Option<u32>> {
    let _guard = self.write_lock.lock()?;

    match self.deletion(user_id, deal_id)? {
      Some(mut deletion) => {
        deletion.rejections += 1;
        store::set_json(
          self.store.as_ref(),
          &keys::deletion(user_id, deal_id.as_str()),
          &deletion,
        )?;
        Ok(Some(deletion.rejections))
      }
      None => Ok(None),
    }
  }
}
