//! Error types shared across the core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the core.
///
/// Per-item network failures during a sync pass never reach this type; they
/// stay in the queue and show up in the pass report instead.
#[derive(Debug, Error)]
pub enum Error {
  /// The local store could not read or write (quota, corruption, locked file).
  #[error("local storage unavailable: {0}")]
  StorageUnavailable(String),

  /// A pass-through network call failed and there was nothing cached to serve.
  #[error("network request failed: {0}")]
  Network(String),
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    Error::StorageUnavailable(e.to_string())
  }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
  fn from(e: std::sync::PoisonError<T>) -> Self {
    Error::StorageUnavailable(format!("Lock poisoned: {}", e))
  }
}
