//! Request values passed through the fetch primitive.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

/// HTTP method of a request descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Method {
  #[default]
  Get,
  Post,
  Put,
  Patch,
  Delete,
  Other(String),
}

/// How the interceptor dispatches a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
  /// Cacheable read
  Read,
  /// Write that invalidates caches and may be queued for retry
  Mutation,
  /// Passed straight to the network
  Bypass,
}

impl Method {
  pub fn as_str(&self) -> &str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Other(m) => m,
    }
  }

  pub fn kind(&self) -> RequestKind {
    match self {
      Method::Get => RequestKind::Read,
      Method::Post | Method::Put | Method::Patch | Method::Delete => RequestKind::Mutation,
      Method::Other(_) => RequestKind::Bypass,
    }
  }
}

impl From<&str> for Method {
  fn from(s: &str) -> Self {
    match s.to_ascii_uppercase().as_str() {
      "" | "GET" => Method::Get,
      "POST" => Method::Post,
      "PUT" => Method::Put,
      "PATCH" => Method::Patch,
      "DELETE" => Method::Delete,
      other => Method::Other(other.to_string()),
    }
  }
}

impl From<String> for Method {
  fn from(s: String) -> Self {
    Method::from(s.as_str())
  }
}

impl From<Method> for String {
  fn from(m: Method) -> Self {
    m.as_str().to_string()
  }
}

impl std::fmt::Display for Method {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Request descriptor handed to the fetch primitive.
///
/// Serializable so failed writes can be persisted in the retry queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
  pub url: String,
  #[serde(default)]
  pub method: Method,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub headers: Vec<(String, String)>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
}

impl Request {
  pub fn new(method: impl Into<Method>, url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      method: method.into(),
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new(Method::Get, url)
  }

  pub fn post(url: impl Into<String>) -> Self {
    Self::new(Method::Post, url)
  }

  pub fn put(url: impl Into<String>) -> Self {
    Self::new(Method::Put, url)
  }

  pub fn patch(url: impl Into<String>) -> Self {
    Self::new(Method::Patch, url)
  }

  pub fn delete(url: impl Into<String>) -> Self {
    Self::new(Method::Delete, url)
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<String>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Serialize `value` as the body and set a JSON content type.
  pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self> {
    let body =
      serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize request body: {}", e))?;
    Ok(
      self
        .with_header("content-type", "application/json")
        .with_body(body),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_method_parsing() {
    assert_eq!(Method::from("post"), Method::Post);
    assert_eq!(Method::from(""), Method::Get);
    assert_eq!(Method::from("head"), Method::Other("HEAD".to_string()));
    assert_eq!(Method::from("OPTIONS").kind(), RequestKind::Bypass);
    assert_eq!(Method::Delete.kind(), RequestKind::Mutation);
  }

  #[test]
  fn test_request_serializes_method_as_string() {
    let request = Request::put("/api/expenses/7").with_body(r#"{"amount_cents":999}"#);
    let json = serde_json::to_value(&request).unwrap();
    assert_eq!(json["method"], "PUT");
    assert!(json.get("headers").is_none());

    let back: Request = serde_json::from_value(json).unwrap();
    assert_eq!(back, request);
  }

  #[test]
  fn test_missing_method_defaults_to_get() {
    let request: Request = serde_json::from_str(r#"{"url":"/api/jobs"}"#).unwrap();
    assert_eq!(request.method, Method::Get);
  }

  #[test]
  fn test_with_json_sets_content_type() {
    let request = Request::post("/api/expenses")
      .with_json(&serde_json::json!({"vendor": "Acme"}))
      .unwrap();
    assert_eq!(request.body.as_deref(), Some(r#"{"vendor":"Acme"}"#));
    assert_eq!(
      request.headers,
      vec![("content-type".to_string(), "application/json".to_string())]
    );
  }
}
