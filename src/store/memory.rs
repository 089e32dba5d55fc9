//! Non-durable store implementations.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{LocalStore, WriteOp};
use crate::error::{Error, Result};

/// In-memory store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
  records: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl LocalStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    Ok(self.records.lock()?.get(key).cloned())
  }

  fn set(&self, key: &str, value: &[u8]) -> Result<()> {
    self
      .records
      .lock()?
      .insert(key.to_string(), value.to_vec());
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    self.records.lock()?.remove(key);
    Ok(())
  }

  fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
    let records = self.records.lock()?;
    Ok(
      records
        .range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
    )
  }

  fn apply(&self, batch: &[WriteOp]) -> Result<()> {
    // Single lock acquisition keeps the batch atomic for readers
    let mut records = self.records.lock()?;
    for op in batch {
      match op {
        WriteOp::Set { key, value } => {
          records.insert(key.clone(), value.clone());
        }
        WriteOp::Delete { key } => {
          records.remove(key);
        }
      }
    }
    Ok(())
  }
}

/// Store used when the real one could not be opened.
/// Every operation fails, so callers fall back to network pass-through.
#[derive(Debug, Clone)]
pub struct UnavailableStore {
  reason: String,
}

impl UnavailableStore {
  pub fn new(reason: impl Into<String>) -> Self {
    Self {
      reason: reason.into(),
    }
  }

  fn err<T>(&self) -> Result<T> {
    Err(Error::StorageUnavailable(self.reason.clone()))
  }
}

impl LocalStore for UnavailableStore {
  fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
    self.err()
  }

  fn set(&self, _key: &str, _value: &[u8]) -> Result<()> {
    self.err()
  }

  fn delete(&self, _key: &str) -> Result<()> {
    self.err()
  }

  fn list_by_prefix(&self, _prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
    self.err()
  }

  fn apply(&self, _batch: &[WriteOp]) -> Result<()> {
    self.err()
  }
}
