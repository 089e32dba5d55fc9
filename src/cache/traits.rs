//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Millis;

/// Trait for entities that can be cached in a listing.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier for this entity within its listing (e.g. deal id)
  fn cache_key(&self) -> String;

  /// Entity type name for log messages (e.g. "deal")
  fn entity_type() -> &'static str;
}

/// Which cache family an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheFamily {
  Deal,
  Api,
}

/// A stored cache record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  /// Logical key: the entity id for listings, the request URL for responses
  pub key: String,
  pub value: Value,
  #[serde(rename = "category")]
  pub family: CacheFamily,
  /// Listing category the entry was cached under
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub group: Option<String>,
  pub created_at: Millis,
  pub expires_at: Millis,
}

impl CacheEntry {
  /// Entries are live strictly before `expires_at`.
  pub fn is_live(&self, now: Millis) -> bool {
    now < self.expires_at
  }
}

/// Result from a read-through lookup, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<Millis>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: Millis) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where read-through data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Live (unexpired) cache entry
  Cache,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_entry_expires_at_boundary() {
    let entry = CacheEntry {
      key: "1".into(),
      value: json!({}),
      family: CacheFamily::Deal,
      group: None,
      created_at: 0,
      expires_at: 1000,
    };
    assert!(entry.is_live(999));
    assert!(!entry.is_live(1000));
  }
}
