//! TTL caching for deal listings and API responses.
//!
//! Entries carry an absolute expiry. A read never returns an expired entry,
//! whether or not the sweep has removed it yet.

mod manager;
mod traits;

pub use manager::CacheManager;
pub use traits::{CacheEntry, CacheFamily, CacheResult, CacheSource, Cacheable};
