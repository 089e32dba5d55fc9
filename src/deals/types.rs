use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::cache::Cacheable;

/// Deal identifier. The API emits both numeric and string ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DealId(String);

impl DealId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for DealId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for DealId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl From<u64> for DealId {
  fn from(n: u64) -> Self {
    Self(n.to_string())
  }
}

impl<'de> Deserialize<'de> for DealId {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
      // Covers u64 past i64::MAX and non-integral ids as well
      Num(serde_json::Number),
      Str(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
      RawId::Num(n) => DealId(n.to_string()),
      RawId::Str(s) => DealId(s),
    })
  }
}

/// A deal as served by the API.
///
/// Only `id` matters to the cache and sync layer; every other field is kept
/// verbatim so snapshots round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
  pub id: DealId,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Deal {
  pub fn new(id: impl Into<DealId>) -> Self {
    Self {
      id: id.into(),
      title: None,
      category: None,
      extra: Map::new(),
    }
  }

  pub fn with_title(mut self, title: impl Into<String>) -> Self {
    self.title = Some(title.into());
    self
  }

  pub fn with_category(mut self, category: impl Into<String>) -> Self {
    self.category = Some(category.into());
    self
  }
}

impl Cacheable for Deal {
  fn cache_key(&self) -> String {
    self.id.to_string()
  }

  fn entity_type() -> &'static str {
    "deal"
  }
}
