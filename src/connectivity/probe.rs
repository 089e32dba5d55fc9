use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

use crate::error::{Error, Result};

/// Reachability check against the API's health endpoint.
///
/// Any HTTP response, whatever its status, counts as online; only transport
/// failures (DNS, refused, timeout) count as offline.
#[derive(Clone)]
pub struct HttpProbe {
  http: reqwest::Client,
  url: String,
}

impl HttpProbe {
  pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self {
      http,
      url: url.into(),
    })
  }

  pub async fn check(&self) -> bool {
    let online = self.http.get(&self.url).send().await.is_ok();
    trace!("Probe {} -> online={}", self.url, online);
    online
  }
}

/// Poll `probe` every `interval`, sending each raw result to `tx`.
/// Stops when the receiver is dropped.
pub fn spawn_probe(probe: HttpProbe, interval: Duration, tx: mpsc::Sender<bool>) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      ticker.tick().await;
      let online = probe.check().await;
      if tx.send(online).await.is_err() {
        break;
      }
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_unreachable_host_is_offline() {
    // Port 9 on loopback: nothing listens, connection is refused
    let probe = HttpProbe::new("http://127.0.0.1:9/health", Duration::from_millis(500)).unwrap();
    assert!(!probe.check().await);
  }

  #[tokio::test]
  async fn test_any_response_is_online() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut buf = [0u8; 1024];
      let _ = socket.read(&mut buf).await;
      let _ = socket
        .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
        .await;
    });

    let probe = HttpProbe::new(format!("http://{}/health", addr), Duration::from_secs(2)).unwrap();
    assert!(probe.check().await);
  }
}
