//! Persistent local key-value storage.
//!
//! One store holds every record family; each family lives under its own key
//! prefix (see [`keys`]). Callers only ever touch their own families.

pub mod keys;
mod memory;
mod sqlite;

use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

pub use memory::{MemoryStore, UnavailableStore};
pub use sqlite::SqliteStore;

/// A single mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
  Set { key: String, value: Vec<u8> },
  Delete { key: String },
}

impl WriteOp {
  /// Build a `Set` op carrying the JSON encoding of `value`.
  pub fn set_json<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self> {
    Ok(WriteOp::Set {
      key: key.into(),
      value: encode(value)?,
    })
  }

  pub fn delete(key: impl Into<String>) -> Self {
    WriteOp::Delete { key: key.into() }
  }
}

/// Durable key-value storage.
///
/// A returned `Ok` means the write survives a process restart. Every failure
/// is reported as [`Error::StorageUnavailable`].
pub trait LocalStore: Send + Sync {
  /// Get the value stored under `key`.
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

  /// Insert or overwrite `key`.
  fn set(&self, key: &str, value: &[u8]) -> Result<()>;

  /// Remove `key`. Removing a missing key succeeds.
  fn delete(&self, key: &str) -> Result<()>;

  /// All records whose key starts with `prefix`, ordered by key.
  fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

  /// Apply every op in `batch`, or none of them.
  fn apply(&self, batch: &[WriteOp]) -> Result<()>;
}

/// Open the SQLite store at `path` (or the default location).
///
/// If it cannot be opened the returned store fails every call, which the
/// caches and the saved-deal queue treat as "no local storage".
pub fn open_or_degrade(path: Option<&Path>) -> Arc<dyn LocalStore> {
  let opened = match path {
    Some(p) => SqliteStore::open(p),
    None => SqliteStore::open_default(),
  };

  match opened {
    Ok(store) => Arc::new(store),
    Err(e) => {
      tracing::warn!("Local store unavailable, running without cache: {}", e);
      Arc::new(UnavailableStore::new(e.to_string()))
    }
  }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
  serde_json::to_vec(value)
    .map_err(|e| Error::StorageUnavailable(format!("Failed to serialize record: {}", e)))
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, data: &[u8]) -> Result<T> {
  serde_json::from_slice(data)
    .map_err(|e| Error::StorageUnavailable(format!("Corrupt record at {}: {}", key, e)))
}

/// Read and decode a JSON record.
pub fn get_json<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Result<Option<T>> {
  match store.get(key)? {
    Some(data) => decode(key, &data).map(Some),
    None => Ok(None),
  }
}

/// Encode and write a JSON record.
pub fn set_json<T: Serialize>(store: &dyn LocalStore, key: &str, value: &T) -> Result<()> {
  store.set(key, &encode(value)?)
}

/// Decode every record under `prefix`, skipping (and logging) corrupt ones.
pub fn list_json<T: DeserializeOwned>(store: &dyn LocalStore, prefix: &str) -> Result<Vec<T>> {
  let records = store
    .list_by_prefix(prefix)?
    .into_iter()
    .filter_map(|(key, data)| match decode(&key, &data) {
      Ok(record) => Some(record),
      Err(e) => {
        tracing::warn!("Skipping unreadable record: {}", e);
        None
      }
    })
    .collect();

  Ok(records)
}
