//! TTL cache manager over the local store.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{CacheEntry, CacheFamily, CacheResult, Cacheable};
use crate::clock::{Clock, Millis};
use crate::deals::Deal;
use crate::error::Result;
use crate::store::{self, keys, LocalStore, WriteOp};

/// Expiring read-through caches for deal listings and API responses.
///
/// Reads filter out expired entries but never delete them; physical removal
/// is left to [`CacheManager::sweep`].
#[derive(Clone)]
pub struct CacheManager {
  store: Arc<dyn LocalStore>,
  clock: Arc<dyn Clock>,
}

/// Entry expiry for `ttl`, or `None` when the ttl disables caching.
fn expiry(now: Millis, ttl: Duration) -> Option<Millis> {
  let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
  (ttl_ms > 0).then(|| now.saturating_add(ttl_ms))
}

impl CacheManager {
  pub fn new(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>) -> Self {
    Self { store, clock }
  }

  /// Store each entity under `(category, cache_key)`, overwriting prior entries.
  ///
  /// A zero ttl retains nothing: earlier entries under the same keys are
  /// removed, nothing new is written.
  pub fn cache_entities<T: Cacheable>(
    &self,
    entities: &[T],
    category: &str,
    ttl: Duration,
  ) -> Result<()> {
    let now = self.clock.now_ms();
    let Some(expires_at) = expiry(now, ttl) else {
      let batch: Vec<WriteOp> = entities
        .iter()
        .map(|entity| WriteOp::delete(keys::deal(category, &entity.cache_key())))
        .collect();
      return self.store.apply(&batch);
    };

    let batch = entities
      .iter()
      .enumerate()
      .map(|(position, entity)| {
        let value = serde_json::to_value(entity).map_err(|e| {
          crate::Error::StorageUnavailable(format!("Failed to serialize entity: {}", e))
        })?;
        let entry = ListingEntry {
          entry: CacheEntry {
            key: entity.cache_key(),
            value,
            family: CacheFamily::Deal,
            group: Some(category.to_string()),
            created_at: now,
            expires_at,
          },
          position,
        };
        WriteOp::set_json(keys::deal(category, &entity.cache_key()), &entry)
      })
      .collect::<Result<Vec<_>>>()?;

    self.store.apply(&batch)?;
    debug!(
      "Cached {} {} entries under {}",
      entities.len(),
      T::entity_type(),
      category
    );

    Ok(())
  }

  /// Store deals under `category` with `expires_at = now + ttl`.
  pub fn cache_deals(&self, deals: &[Deal], category: &str, ttl: Duration) -> Result<()> {
    self.cache_entities(deals, category, ttl)
  }

  /// Live entities for `category` (or every category), newest first.
  ///
  /// An entity cached under several categories appears once. Storage errors
  /// read as an empty cache.
  pub fn get_cached<T: Cacheable>(&self, category: Option<&str>, limit: usize) -> Vec<T> {
    self
      .lookup(category, limit)
      .map(|result| result.data)
      .unwrap_or_default()
  }

  /// Live deals for `category` (or all), newest `created_at` first, at most `limit`.
  pub fn get_cached_deals(&self, category: Option<&str>, limit: usize) -> Vec<Deal> {
    self.get_cached(category, limit)
  }

  /// Like [`CacheManager::get_cached`] but `None` on a miss, with the age of
  /// the oldest returned entry.
  pub fn lookup<T: Cacheable>(
    &self,
    category: Option<&str>,
    limit: usize,
  ) -> Option<CacheResult<Vec<T>>> {
    let now = self.clock.now_ms();

    let mut entries: Vec<ListingEntry> =
      match store::list_json(self.store.as_ref(), &keys::deal_prefix(category)) {
        Ok(entries) => entries,
        Err(e) => {
          warn!("Deal cache unavailable, treating as miss: {}", e);
          return None;
        }
      };

    entries.retain(|e| e.entry.is_live(now));
    entries.sort_by(|a, b| {
      b.entry
        .created_at
        .cmp(&a.entry.created_at)
        .then(a.position.cmp(&b.position))
    });

    let mut seen = HashSet::new();
    let mut cached_at = None;
    let data: Vec<T> = entries
      .into_iter()
      .filter(|e| seen.insert(e.entry.key.clone()))
      .filter_map(|e| {
        let created_at = e.entry.created_at;
        let entity = serde_json::from_value(e.entry.value).ok()?;
        cached_at = Some(cached_at.map_or(created_at, |c: Millis| c.min(created_at)));
        Some(entity)
      })
      .take(limit)
      .collect();

    match cached_at {
      Some(cached_at) if !data.is_empty() => {
        debug!("Cache hit: {} {} entries", data.len(), T::entity_type());
        Some(CacheResult::from_cache(data, cached_at))
      }
      _ => {
        debug!("Cache miss for {} listing", T::entity_type());
        None
      }
    }
  }

  /// Record that the complete unfiltered listing was cached just now.
  ///
  /// Per-category entries alone say nothing about whether every category is
  /// present, so an unfiltered read only counts as a hit while this is live.
  pub fn mark_full_listing(&self, ttl: Duration) -> Result<()> {
    let now = self.clock.now_ms();
    let Some(expires_at) = expiry(now, ttl) else {
      return self.store.delete(keys::FULL_LISTING);
    };

    let entry = CacheEntry {
      key: keys::FULL_LISTING.to_string(),
      value: Value::Null,
      family: CacheFamily::Deal,
      group: None,
      created_at: now,
      expires_at,
    };
    store::set_json(self.store.as_ref(), keys::FULL_LISTING, &entry)
  }

  pub fn has_full_listing(&self) -> bool {
    let now = self.clock.now_ms();

    match store::get_json::<CacheEntry>(self.store.as_ref(), keys::FULL_LISTING) {
      Ok(Some(entry)) => entry.is_live(now),
      Ok(None) => false,
      Err(e) => {
        warn!("Deal cache unavailable, treating as miss: {}", e);
        false
      }
    }
  }

  /// Cache a single response body under its request URL.
  ///
  /// A zero ttl removes any earlier response for `url`.
  pub fn cache_api_response(&self, url: &str, data: &Value, ttl: Duration) -> Result<()> {
    let now = self.clock.now_ms();
    let Some(expires_at) = expiry(now, ttl) else {
      return self.store.delete(&keys::api(url));
    };

    let entry = CacheEntry {
      key: url.to_string(),
      value: data.clone(),
      family: CacheFamily::Api,
      group: None,
      created_at: now,
      expires_at,
    };
    store::set_json(self.store.as_ref(), &keys::api(url), &entry)
  }

  /// The cached response for `url`, if present and unexpired.
  pub fn get_cached_api_response(&self, url: &str) -> Option<Value> {
    self.get_cached_api_entry(url).map(|entry| entry.value)
  }

  /// Like [`CacheManager::get_cached_api_response`], keeping the entry's timestamps.
  pub fn get_cached_api_entry(&self, url: &str) -> Option<CacheEntry> {
    let now = self.clock.now_ms();

    match store::get_json::<CacheEntry>(self.store.as_ref(), &keys::api(url)) {
      // Hash collisions are astronomically unlikely; the url check is free
      Ok(Some(entry)) if entry.is_live(now) && entry.key == url => Some(entry),
      Ok(_) => None,
      Err(e) => {
        warn!("API cache unavailable for {}: {}", url, e);
        None
      }
    }
  }

  /// Delete every expired or unreadable entry in both cache families.
  /// Returns the number of entries removed.
  pub fn sweep(&self) -> Result<usize> {
    let now = self.clock.now_ms();
    let mut doomed = Vec::new();

    for prefix in [keys::DEAL_PREFIX, keys::FULL_LISTING, keys::API_PREFIX] {
      for (key, data) in self.store.list_by_prefix(prefix)? {
        let live = match serde_json::from_slice::<ListingEntry>(&data) {
          Ok(e) => e.entry.is_live(now),
          Err(_) => false,
        };
        if !live {
          doomed.push(WriteOp::delete(key));
        }
      }
    }

    if !doomed.is_empty() {
      self.store.apply(&doomed)?;
    }
    debug!("Cache sweep removed {} entries", doomed.len());

    Ok(doomed.len())
  }

  /// Explicitly drop cached listings for `category` (or all of them).
  ///
  /// Either way the unfiltered listing is no longer complete.
  pub fn clear_deals(&self, category: Option<&str>) -> Result<()> {
    self.clear_prefix(&keys::deal_prefix(category))?;
    self.store.delete(keys::FULL_LISTING)
  }

  /// Explicitly drop every cached API response.
  pub fn clear_api_responses(&self) -> Result<()> {
    self.clear_prefix(keys::API_PREFIX)
  }

  fn clear_prefix(&self, prefix: &str) -> Result<()> {
    let batch: Vec<WriteOp> = self
      .store
      .list_by_prefix(prefix)?
      .into_iter()
      .map(|(key, _)| WriteOp::delete(key))
      .collect();
    self.store.apply(&batch)
  }
}

/// Listing entries also remember their position within the batch so a
/// listing cached in one call reads back in server order.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct ListingEntry {
  #[serde(flatten)]
  entry: CacheEntry,
  #[serde(default)]
  position: usize,
}
