//! Key layout for the record families.
//!
//! Segments are form-url-encoded, so a `:` inside a user id or category can
//! never be mistaken for the separator.

use sha2::{Digest, Sha256};

pub const DEAL_PREFIX: &str = "deal:";
pub const API_PREFIX: &str = "api:";
pub const SAVED_PREFIX: &str = "saved:";
pub const DELETION_PREFIX: &str = "unsave:";

/// Freshness marker for the unfiltered listing. Sits outside [`DEAL_PREFIX`]
/// so listing scans never see it.
pub const FULL_LISTING: &str = "deal-all";

fn segment(raw: &str) -> String {
  url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// Cached listing entry for one deal within one category.
pub fn deal(category: &str, deal_id: &str) -> String {
  format!("{}{}:{}", DEAL_PREFIX, segment(category), segment(deal_id))
}

/// Prefix selecting one category's listing entries, or all of them.
pub fn deal_prefix(category: Option<&str>) -> String {
  match category {
    Some(c) => format!("{}{}:", DEAL_PREFIX, segment(c)),
    None => DEAL_PREFIX.to_string(),
  }
}

/// Cached API response for a request URL.
pub fn api(url: &str) -> String {
  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  format!("{}{}", API_PREFIX, hex::encode(hasher.finalize()))
}

pub fn saved(user_id: &str, deal_id: &str) -> String {
  format!("{}{}:{}", SAVED_PREFIX, segment(user_id), segment(deal_id))
}

pub fn saved_prefix(user_id: &str) -> String {
  format!("{}{}:", SAVED_PREFIX, segment(user_id))
}

pub fn deletion(user_id: &str, deal_id: &str) -> String {
  format!("{}{}:{}", DELETION_PREFIX, segment(user_id), segment(deal_id))
}

pub fn deletion_prefix(user_id: &str) -> String {
  format!("{}{}:", DELETION_PREFIX, segment(user_id))
}
