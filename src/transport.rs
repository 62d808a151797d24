//! Origin transport: the engine's only path to the network.

use async_trait::async_trait;
use chrono::Utc;
use url::Url;

use crate::error::TransportError;
use crate::store::{ResourceRecord, ResponseKind};

/// One fetched origin response.
#[derive(Debug, Clone)]
pub struct FetchedResource {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
}

impl FetchedResource {
  /// Exactly an OK status and a same-origin response; the only combination
  /// the store ever accepts.
  pub fn cacheable(&self) -> bool {
    self.status == 200 && self.kind == ResponseKind::Basic
  }

  /// Freeze this response into a store record.
  pub fn into_record(self) -> ResourceRecord {
    ResourceRecord {
      status: self.status,
      content_type: self.content_type,
      body: self.body,
      kind: self.kind,
      stored_at: Utc::now(),
    }
  }
}

/// Collaborator that performs the actual network fetch.
///
/// Timeouts are the transport's concern: a fetch that cannot resolve must
/// eventually return a `TransportError` so every request terminates.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn fetch(&self, key: &str) -> Result<FetchedResource, TransportError>;
}

/// HTTP transport over reqwest, resolving resource keys against a fixed
/// origin.
pub struct HttpTransport {
  client: reqwest::Client,
  origin: Url,
}

impl HttpTransport {
  pub fn new(origin: Url) -> Self {
    Self {
      client: reqwest::Client::new(),
      origin,
    }
  }

  fn resolve(&self, key: &str) -> Result<Url, TransportError> {
    self.origin.join(key).map_err(|e| TransportError::InvalidKey {
      key: key.to_string(),
      reason: e.to_string(),
    })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn fetch(&self, key: &str) -> Result<FetchedResource, TransportError> {
    let url = self.resolve(key)?;

    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| TransportError::Network {
        key: key.to_string(),
        reason: e.to_string(),
      })?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);

    // Redirects may land off-origin; classify by where the body actually
    // came from, not where the request started.
    let kind = if same_origin(&self.origin, response.url()) {
      ResponseKind::Basic
    } else {
      ResponseKind::Opaque
    };

    let body = response
      .bytes()
      .await
      .map_err(|e| TransportError::Network {
        key: key.to_string(),
        reason: e.to_string(),
      })?
      .to_vec();

    Ok(FetchedResource {
      status,
      content_type,
      body,
      kind,
    })
  }
}

fn same_origin(a: &Url, b: &Url) -> bool {
  a.scheme() == b.scheme()
    && a.host_str() == b.host_str()
    && a.port_or_known_default() == b.port_or_known_default()
}
