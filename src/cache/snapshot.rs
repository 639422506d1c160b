//! Immutable copies of HTTP responses.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;

/// Captured HTTP response.
///
/// Status, headers and body are copied out of the live response once, so a snapshot can be
/// stored and handed out repeatedly. Cloning shares the body buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
  status: u16,
  headers: Vec<(String, String)>,
  body: Bytes,
}

impl ResponseSnapshot {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers,
      body: body.into(),
    }
  }

  /// A response with a JSON body and content type.
  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self::new(
      status,
      vec![("content-type".to_string(), "application/json".to_string())],
      value.to_string(),
    )
  }

  pub fn status(&self) -> u16 {
    self.status
  }

  /// 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value with a case-insensitive name match.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  pub fn json_body<T: DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Failed to parse response body: {}", e))
  }

  /// Same status and headers with a replaced body.
  pub fn with_body(&self, body: impl Into<Bytes>) -> Self {
    Self {
      status: self.status,
      headers: self.headers.clone(),
      body: body.into(),
    }
  }
}
