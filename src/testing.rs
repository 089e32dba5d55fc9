//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

use crate::deals::{Deal, DealId, DealsApi, RemoteError};

/// Scriptable in-process stand-in for the deals API.
#[derive(Default)]
pub struct FakeApi {
  pub saves: Mutex<Vec<(String, DealId)>>,
  pub unsaves: Mutex<Vec<(String, DealId)>>,
  pub fetches: AtomicUsize,
  pub deals: Mutex<Vec<Deal>>,
  save_failures: Mutex<HashMap<DealId, RemoteError>>,
  unsave_failures: Mutex<HashMap<DealId, RemoteError>>,
  offline: AtomicBool,
  hold_saves: AtomicBool,
  parked: AtomicUsize,
  release: Notify,
}

impl FakeApi {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_deals(deals: Vec<Deal>) -> Self {
    let api = Self::default();
    *api.deals.lock().unwrap() = deals;
    api
  }

  pub fn fail_save(&self, id: impl Into<DealId>, err: RemoteError) {
    self.save_failures.lock().unwrap().insert(id.into(), err);
  }

  pub fn fail_unsave(&self, id: impl Into<DealId>, err: RemoteError) {
    self.unsave_failures.lock().unwrap().insert(id.into(), err);
  }

  pub fn heal(&self) {
    self.save_failures.lock().unwrap().clear();
    self.unsave_failures.lock().unwrap().clear();
  }

  /// Every request fails with a transport error.
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Park every save call until [`FakeApi::release_one`].
  pub fn hold_saves(&self) {
    self.hold_saves.store(true, Ordering::SeqCst);
  }

  pub fn release_one(&self) {
    self.release.notify_one();
  }

  /// Yield until `n` save calls are parked by [`FakeApi::hold_saves`].
  pub async fn wait_parked(&self, n: usize) {
    while self.parked.load(Ordering::SeqCst) < n {
      tokio::task::yield_now().await;
    }
  }

  pub fn save_count(&self) -> usize {
    self.saves.lock().unwrap().len()
  }

  pub fn unsave_count(&self) -> usize {
    self.unsaves.lock().unwrap().len()
  }

  fn check_online(&self) -> Result<(), RemoteError> {
    if self.offline.load(Ordering::SeqCst) {
      Err(RemoteError::Transient("connection refused".into()))
    } else {
      Ok(())
    }
  }
}

#[async_trait]
impl DealsApi for FakeApi {
  async fn save_deal_remote(&self, user_id: &str, deal_id: &DealId) -> Result<(), RemoteError> {
    if self.hold_saves.load(Ordering::SeqCst) {
      self.parked.fetch_add(1, Ordering::SeqCst);
      self.release.notified().await;
    }
    self.check_online()?;
    self
      .saves
      .lock()
      .unwrap()
      .push((user_id.to_string(), deal_id.clone()));
    match self.save_failures.lock().unwrap().get(deal_id) {
      Some(err) => Err(err.clone()),
      None => Ok(()),
    }
  }

  async fn unsave_deal_remote(&self, user_id: &str, deal_id: &DealId) -> Result<(), RemoteError> {
    self.check_online()?;
    self
      .unsaves
      .lock()
      .unwrap()
      .push((user_id.to_string(), deal_id.clone()));
    match self.unsave_failures.lock().unwrap().get(deal_id) {
      Some(err) => Err(err.clone()),
      None => Ok(()),
    }
  }

  async fn fetch_deals(&self, category: Option<&str>) -> Result<Vec<Deal>, RemoteError> {
    self.check_online()?;
    self.fetches.fetch_add(1, Ordering::SeqCst);
    let deals = self.deals.lock().unwrap().clone();
    Ok(
      deals
        .into_iter()
        .filter(|d| category.is_none() || d.category.as_deref() == category)
        .collect(),
    )
  }

  async fn get_json(&self, path: &str) -> Result<Value, RemoteError> {
    self.check_online()?;
    self.fetches.fetch_add(1, Ordering::SeqCst);
    Ok(json!({ "path": path }))
  }

  fn url_for(&self, path: &str) -> String {
    format!("https://api.test{}", path)
  }
}
