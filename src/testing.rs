//! Test doubles shared by unit tests.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::ResponseSnapshot;
use crate::http::{Request, Transport};
use crate::storage::DurableStorage;

/// Storage whose every operation fails.
pub(crate) struct FailingStorage;

impl DurableStorage for FailingStorage {
  fn get(&self, _key: &str) -> Result<Option<String>> {
    Err(eyre!("storage unavailable"))
  }

  fn set(&self, _key: &str, _value: &str) -> Result<()> {
    Err(eyre!("quota exceeded"))
  }

  fn remove(&self, _key: &str) -> Result<()> {
    Err(eyre!("storage unavailable"))
  }
}

/// Scripted transport keyed by `"{METHOD} {path}"`.
///
/// Unknown routes answer 404. While unreachable, every request fails like a dropped
/// connection.
#[derive(Default)]
pub(crate) struct MockTransport {
  routes: Mutex<HashMap<String, ResponseSnapshot>>,
  calls: Mutex<Vec<Request>>,
  unreachable: AtomicBool,
  delay: Mutex<Option<Duration>>,
}

impl MockTransport {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn respond(&self, method: &str, path: &str, response: ResponseSnapshot) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(format!("{} {}", method, path), response);
  }

  pub(crate) fn respond_json(
    &self,
    method: &str,
    path: &str,
    status: u16,
    body: serde_json::Value,
  ) {
    self.respond(method, path, ResponseSnapshot::json(status, &body));
  }

  pub(crate) fn set_unreachable(&self, unreachable: bool) {
    self.unreachable.store(unreachable, Ordering::SeqCst);
  }

  pub(crate) fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  pub(crate) fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub(crate) fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

impl Transport for MockTransport {
  fn send<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<ResponseSnapshot>> {
    Box::pin(async move {
      self.calls.lock().unwrap().push(request.clone());

      let delay = *self.delay.lock().unwrap();
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }

      if self.unreachable.load(Ordering::SeqCst) {
        return Err(eyre!("Failed to send {} {}: connection refused", request.method, request.url));
      }

      let path = request
        .url
        .split_once('?')
        .map(|(path, _)| path)
        .unwrap_or(&request.url);
      let route = format!("{} {}", request.method, path);

      Ok(
        self
          .routes
          .lock()
          .unwrap()
          .get(&route)
          .cloned()
          .unwrap_or_else(|| ResponseSnapshot::new(404, vec![], "not found")),
      )
    })
  }
}
