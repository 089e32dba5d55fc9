//! Offline-first cache and saved-deal synchronization.
//!
//! The crate is organised leaf-first:
//! - [`store`]: durable key-value storage shared by every record family
//! - [`cache`]: TTL caches for deal listings and raw API responses
//! - [`connectivity`]: online/offline state, debouncing and probing
//! - [`sync`]: the saved-deal queue and the orchestrator that drains it
//! - [`deals`]: the network boundary and the client the UI talks to

pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod deals;
pub mod error;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
