use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use super::types::{Deal, DealId};
use crate::config::ApiConfig;
use crate::error::{Error, Result};

/// Per-request failure talking to the deals API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
  /// Transport error, timeout, 5xx, 408 or 429. Worth retrying.
  #[error("transient network failure: {0}")]
  Transient(String),
  /// Any other non-success status. Retrying the same request will not help.
  #[error("server rejected request ({status}): {message}")]
  Rejected { status: u16, message: String },
}

impl RemoteError {
  pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
    let message = message.into();
    if status.is_server_error()
      || status == StatusCode::REQUEST_TIMEOUT
      || status == StatusCode::TOO_MANY_REQUESTS
    {
      RemoteError::Transient(format!("{}: {}", status, message))
    } else {
      RemoteError::Rejected {
        status: status.as_u16(),
        message,
      }
    }
  }

  pub fn is_transient(&self) -> bool {
    matches!(self, RemoteError::Transient(_))
  }
}

impl From<reqwest::Error> for RemoteError {
  fn from(e: reqwest::Error) -> Self {
    match e.status() {
      Some(status) => RemoteError::from_status(status, e.to_string()),
      None => RemoteError::Transient(e.to_string()),
    }
  }
}

/// The network operations the core consumes.
#[async_trait]
pub trait DealsApi: Send + Sync {
  /// Record `deal_id` as saved by `user_id` on the server.
  async fn save_deal_remote(&self, user_id: &str, deal_id: &DealId)
    -> std::result::Result<(), RemoteError>;

  /// Remove the server-side save. Already-absent saves count as success.
  async fn unsave_deal_remote(
    &self,
    user_id: &str,
    deal_id: &DealId,
  ) -> std::result::Result<(), RemoteError>;

  /// List deals, optionally for one category.
  async fn fetch_deals(&self, category: Option<&str>)
    -> std::result::Result<Vec<Deal>, RemoteError>;

  /// GET an arbitrary JSON endpoint relative to the API base.
  async fn get_json(&self, path: &str) -> std::result::Result<Value, RemoteError>;

  /// Absolute URL for `path`, used as the response cache key.
  fn url_for(&self, path: &str) -> String;
}

/// `GET /deals` answers either a bare array or an envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum DealsResponse {
  List(Vec<Deal>),
  Envelope { deals: Vec<Deal> },
}

/// reqwest-backed deals API client.
#[derive(Clone)]
pub struct HttpDealsClient {
  http: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl HttpDealsClient {
  pub fn new(config: &ApiConfig, token: Option<String>) -> Result<Self> {
    let base = Url::parse(&config.url)
      .map_err(|e| Error::Network(format!("Invalid API url {}: {}", config.url, e)))?;
    if base.cannot_be_a_base() {
      return Err(Error::Network(format!("Invalid API url {}", config.url)));
    }

    let http = reqwest::Client::builder()
      .timeout(config.timeout())
      .build()
      .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self { http, base, token })
  }

  /// Base URL with `segments` appended, each percent-encoded.
  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  fn save_url(&self, deal_id: &DealId) -> Url {
    self.endpoint(&["deals", deal_id.as_str(), "save"])
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let builder = self.http.request(method, url);
    match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }

  async fn send(&self, builder: RequestBuilder) -> std::result::Result<reqwest::Response, RemoteError> {
    let response = builder.send().await?;
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::from_status(status, body))
  }
}

#[async_trait]
impl DealsApi for HttpDealsClient {
  async fn save_deal_remote(
    &self,
    user_id: &str,
    deal_id: &DealId,
  ) -> std::result::Result<(), RemoteError> {
    let request = self
      .request(Method::POST, self.save_url(deal_id))
      .header("X-User-Id", user_id);
    self.send(request).await?;
    Ok(())
  }

  async fn unsave_deal_remote(
    &self,
    user_id: &str,
    deal_id: &DealId,
  ) -> std::result::Result<(), RemoteError> {
    let request = self
      .request(Method::DELETE, self.save_url(deal_id))
      .header("X-User-Id", user_id);

    match self.send(request).await {
      Ok(_) => Ok(()),
      // Nothing to delete server-side is the state we wanted
      Err(RemoteError::Rejected { status: 404, .. }) => Ok(()),
      Err(e) => Err(e),
    }
  }

  async fn fetch_deals(
    &self,
    category: Option<&str>,
  ) -> std::result::Result<Vec<Deal>, RemoteError> {
    let mut url = self.endpoint(&["deals"]);
    if let Some(category) = category {
      url.query_pairs_mut().append_pair("category", category);
    }

    let response = self.send(self.request(Method::GET, url)).await?;
    let deals = match response.json::<DealsResponse>().await? {
      DealsResponse::List(deals) => deals,
      DealsResponse::Envelope { deals } => deals,
    };

    Ok(deals)
  }

  async fn get_json(&self, path: &str) -> std::result::Result<Value, RemoteError> {
    let url = Url::parse(&self.url_for(path))
      .map_err(|e| RemoteError::Rejected {
        status: 400,
        message: format!("Invalid path {}: {}", path, e),
      })?;

    let response = self.send(self.request(Method::GET, url)).await?;
    Ok(response.json::<Value>().await?)
  }

  fn url_for(&self, path: &str) -> String {
    format!(
      "{}/{}",
      self.base.as_str().trim_end_matches('/'),
      path.trim_start_matches('/')
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(url: &str) -> HttpDealsClient {
    let config = ApiConfig {
      url: url.to_string(),
      ..ApiConfig::default()
    };
    HttpDealsClient::new(&config, None).unwrap()
  }

  #[test]
  fn test_save_url_encodes_id() {
    let c = client("https://api.example.com/v1/");
    assert_eq!(
      c.save_url(&DealId::new("a/b")).as_str(),
      "https://api.example.com/v1/deals/a%2Fb/save"
    );
    assert_eq!(
      client("https://api.example.com").save_url(&DealId::new("42")).as_str(),
      "https://api.example.com/deals/42/save"
    );
  }

  #[test]
  fn test_url_for_joins_paths() {
    let c = client("https://api.example.com/v1");
    assert_eq!(
      c.url_for("/deals/trending?limit=5"),
      "https://api.example.com/v1/deals/trending?limit=5"
    );
  }

  #[test]
  fn test_status_classification() {
    assert!(RemoteError::from_status(StatusCode::BAD_GATEWAY, "").is_transient());
    assert!(RemoteError::from_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
    assert!(RemoteError::from_status(StatusCode::REQUEST_TIMEOUT, "").is_transient());
    assert_eq!(
      RemoteError::from_status(StatusCode::NOT_FOUND, "gone"),
      RemoteError::Rejected {
        status: 404,
        message: "gone".to_string()
      }
    );
  }

  #[test]
  fn test_invalid_base_url_rejected() {
    let config = ApiConfig {
      url: "not a url".to_string(),
      ..ApiConfig::default()
    };
    assert!(HttpDealsClient::new(&config, None).is_err());
  }

  #[test]
  fn test_deals_response_shapes() {
    let list: DealsResponse = serde_json::from_str(r#"[{"id": 1}]"#).unwrap();
    assert!(matches!(list, DealsResponse::List(d) if d.len() == 1));

    let env: DealsResponse = serde_json::from_str(r#"{"deals": [{"id": 1}, {"id": 2}]}"#).unwrap();
    assert!(matches!(env, DealsResponse::Envelope { deals } if deals.len() == 2));
  }
}
