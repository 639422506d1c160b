//! The fetch primitive and its reqwest implementation.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::request::Request;
use crate::cache::ResponseSnapshot;
use crate::config::Config;
use crate::connectivity::Connectivity;

/// The fetch primitive.
///
/// Resolves to a response for any HTTP status and fails only when no response was
/// received (connection refused, DNS failure, timeout).
pub trait Transport: Send + Sync {
  fn send<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<ResponseSnapshot>>;
}

/// reqwest-backed transport.
///
/// Relative URLs are resolved against the configured origin. When given a [`Connectivity`]
/// handle it reports offline on connect failures and online on any response.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  origin: Url,
  connectivity: Option<Connectivity>,
}

impl HttpTransport {
  pub fn new(config: &Config) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.http.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: config.origin()?,
      connectivity: None,
    })
  }

  pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
    self.connectivity = Some(connectivity);
    self
  }

  async fn execute(&self, request: &Request) -> Result<ResponseSnapshot> {
    let url = self
      .origin
      .join(&request.url)
      .map_err(|e| eyre!("Failed to resolve request URL '{}': {}", request.url, e))?;

    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .map_err(|e| eyre!("Invalid HTTP method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = match builder.send().await {
      Ok(response) => response,
      Err(e) => {
        // A timed out request may still have reached the server
        if e.is_connect() {
          self.report(false);
        }
        return Err(eyre!("Failed to send {} {}: {}", request.method, url, e));
      }
    };
    self.report(true);

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body: Bytes = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?;

    debug!(method = %request.method, %url, status, "HTTP request completed");
    Ok(ResponseSnapshot::new(status, headers, body))
  }

  fn report(&self, online: bool) {
    if let Some(connectivity) = &self.connectivity {
      connectivity.set_online(online);
    }
  }
}

impl Transport for HttpTransport {
  fn send<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<ResponseSnapshot>> {
    Box::pin(self.execute(request))
  }
}
