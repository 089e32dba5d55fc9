//! Offline-first deals client: the surface the UI layer talks to.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::client::{DealsApi, HttpDealsClient};
use super::types::{Deal, DealId};
use crate::cache::{CacheManager, CacheResult};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::connectivity::ConnectivityState;
use crate::error::{Error, Result};
use crate::store::LocalStore;
use crate::sync::{SavedDealRecord, SavedDeals, SyncOrchestrator, SyncOutcome};

/// Category used for deals fetched without a filter that carry none themselves.
const UNCATEGORIZED: &str = "uncategorized";

/// Deals client with transparent caching and offline saves.
///
/// Reads go through the TTL caches and fall back to the network on a miss.
/// Saves and unsaves are written locally first and pushed to the server by
/// the sync orchestrator.
#[derive(Clone)]
pub struct CachedDealsClient {
  api: Arc<dyn DealsApi>,
  cache: CacheManager,
  saved: Arc<SavedDeals>,
  sync: Arc<SyncOrchestrator>,
  connectivity: Arc<ConnectivityState>,
  deal_ttl: Duration,
  api_ttl: Duration,
}

impl CachedDealsClient {
  pub fn new(
    api: Arc<dyn DealsApi>,
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    connectivity: Arc<ConnectivityState>,
    config: &Config,
  ) -> Self {
    let cache = CacheManager::new(store.clone(), clock.clone());
    let saved = Arc::new(SavedDeals::new(store, clock.clone()));
    let sync = Arc::new(
      SyncOrchestrator::new(saved.clone(), api.clone(), connectivity.clone(), clock)
        .with_max_rejections(config.sync.max_rejections),
    );

    Self {
      api,
      cache,
      saved,
      sync,
      connectivity,
      deal_ttl: config.cache.deal_ttl(),
      api_ttl: config.cache.api_ttl(),
    }
  }

  /// Build the HTTP-backed client described by `config`.
  pub fn from_config(
    config: &Config,
    store: Arc<dyn LocalStore>,
    connectivity: Arc<ConnectivityState>,
  ) -> Result<Self> {
    let api = HttpDealsClient::new(&config.api, Config::get_api_token())?;
    Ok(Self::new(
      Arc::new(api),
      store,
      Arc::new(SystemClock),
      connectivity,
      config,
    ))
  }

  pub fn orchestrator(&self) -> Arc<SyncOrchestrator> {
    Arc::clone(&self.sync)
  }

  pub fn connectivity(&self) -> Arc<ConnectivityState> {
    Arc::clone(&self.connectivity)
  }

  // --------------------------------------------------------------------------
  // Saved deals
  // --------------------------------------------------------------------------

  /// Save `deal` locally. Succeeds without the network; the server hears
  /// about it on the next sync.
  pub fn save_deal_offline(&self, deal: &Deal, user_id: &str) -> Result<SavedDealRecord> {
    self.saved.save(deal, user_id).inspect_err(|e| {
      warn!("Could not save deal {} offline: {}", deal.id, e);
    })
  }

  /// Remove a saved deal locally and queue the removal for the server.
  pub fn remove_saved_deal_offline(&self, deal_id: &DealId, user_id: &str) -> Result<()> {
    self
      .saved
      .remove(deal_id, user_id)
      .map(|_| ())
      .inspect_err(|e| warn!("Could not remove saved deal {} offline: {}", deal_id, e))
  }

  /// The user's saved deals, newest first. Empty if storage is unavailable.
  pub fn get_saved_deals_offline(&self, user_id: &str) -> Vec<SavedDealRecord> {
    self.saved.list(user_id).unwrap_or_else(|e| {
      warn!("Saved deals unavailable: {}", e);
      Vec::new()
    })
  }

  pub fn is_deal_saved_offline(&self, deal_id: &DealId, user_id: &str) -> bool {
    self.saved.is_saved(deal_id, user_id).unwrap_or_else(|e| {
      warn!("Saved deals unavailable: {}", e);
      false
    })
  }

  /// Queued saves plus unsaves for `user_id`.
  pub fn pending_count(&self, user_id: &str) -> Result<usize> {
    self.saved.pending_count(user_id)
  }

  // --------------------------------------------------------------------------
  // Caches
  // --------------------------------------------------------------------------

  /// Cache `deals` under `category` with the configured listing ttl.
  pub fn cache_deals(&self, deals: &[Deal], category: &str) -> Result<()> {
    self.cache.cache_deals(deals, category, self.deal_ttl)
  }

  pub fn get_cached_deals(&self, category: Option<&str>, limit: usize) -> Vec<Deal> {
    self.cache.get_cached_deals(category, limit)
  }

  pub fn cache_api_response(&self, url: &str, data: &Value, ttl: Duration) -> Result<()> {
    self.cache.cache_api_response(url, data, ttl)
  }

  pub fn get_cached_api_response(&self, url: &str) -> Option<Value> {
    self.cache.get_cached_api_response(url)
  }

  /// Delete expired cache entries.
  pub fn sweep(&self) -> Result<usize> {
    self.cache.sweep()
  }

  // --------------------------------------------------------------------------
  // Read-through
  // --------------------------------------------------------------------------

  /// Deals for `category` (or all), served from cache while fresh.
  pub async fn deals(
    &self,
    category: Option<&str>,
    limit: usize,
  ) -> Result<CacheResult<Vec<Deal>>> {
    // Live entries in some categories do not make a complete unfiltered listing
    let complete = category.is_some() || self.cache.has_full_listing();
    if complete {
      if let Some(hit) = self.cache.lookup::<Deal>(category, limit) {
        return Ok(hit);
      }
    }
    self.refresh_deals(category, limit).await
  }

  /// Fetch deals from the network and repopulate the cache.
  pub async fn refresh_deals(
    &self,
    category: Option<&str>,
    limit: usize,
  ) -> Result<CacheResult<Vec<Deal>>> {
    let mut deals = self
      .api
      .fetch_deals(category)
      .await
      .map_err(|e| Error::Network(e.to_string()))?;

    self.populate(category, &deals);
    deals.truncate(limit);

    Ok(CacheResult::from_network(deals))
  }

  fn populate(&self, category: Option<&str>, deals: &[Deal]) {
    let mut groups: BTreeMap<&str, Vec<Deal>> = BTreeMap::new();
    match category {
      Some(c) => {
        groups.insert(c, deals.to_vec());
      }
      None => {
        for deal in deals {
          let group = deal.category.as_deref().unwrap_or(UNCATEGORIZED);
          groups.entry(group).or_default().push(deal.clone());
        }
      }
    }

    let mut cached_all = true;
    for (group, deals) in groups {
      if let Err(e) = self.cache.cache_deals(&deals, group, self.deal_ttl) {
        // Pass-through still works without the cache
        warn!("Could not cache deals for {}: {}", group, e);
        cached_all = false;
      }
    }

    if category.is_none() && cached_all {
      if let Err(e) = self.cache.mark_full_listing(self.deal_ttl) {
        warn!("Could not mark the full listing as cached: {}", e);
      }
    }
  }

  /// GET a JSON endpoint, served from the response cache while fresh.
  pub async fn get_json(&self, path: &str) -> Result<CacheResult<Value>> {
    let url = self.api.url_for(path);
    if let Some(entry) = self.cache.get_cached_api_entry(&url) {
      debug!("Response cache hit for {}", url);
      return Ok(CacheResult::from_cache(entry.value, entry.created_at));
    }

    let data = self
      .api
      .get_json(path)
      .await
      .map_err(|e| Error::Network(e.to_string()))?;

    if let Err(e) = self.cache.cache_api_response(&url, &data, self.api_ttl) {
      warn!("Could not cache response for {}: {}", url, e);
    }

    Ok(CacheResult::from_network(data))
  }

  // --------------------------------------------------------------------------
  // Sync and observable state
  // --------------------------------------------------------------------------

  pub async fn sync(&self, user_id: Option<&str>) -> Result<SyncOutcome> {
    self.sync.sync_saved_deals(user_id).await
  }

  pub async fn drain_all(&self) -> Result<Vec<SyncOutcome>> {
    self.sync.drain_all().await
  }

  pub fn is_online(&self) -> bool {
    self.connectivity.is_online()
  }

  pub fn is_syncing(&self) -> bool {
    self.sync.is_syncing()
  }

  /// When the last sync attempt finished. For display only.
  pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
    self
      .connectivity
      .last_sync_at()
      .and_then(DateTime::from_timestamp_millis)
  }
}
