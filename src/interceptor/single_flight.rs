//! Sharing one network request between concurrent reads of the same key.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::cache::ResponseSnapshot;

type Outcome = std::result::Result<ResponseSnapshot, String>;

#[derive(Default)]
pub struct SingleFlight {
  in_flight: Mutex<HashMap<String, broadcast::Sender<Outcome>>>,
}

/// Leader's claim on a key. Releasing it (or dropping it on cancellation) removes the
/// key so waiting followers are woken.
struct Flight<'a> {
  group: &'a SingleFlight,
  key: &'a str,
  released: bool,
}

impl Flight<'_> {
  fn finish(mut self, outcome: Outcome) {
    self.released = true;
    if let Some(tx) = self.group.take(self.key) {
      // No followers is fine
      let _ = tx.send(outcome);
    }
  }
}

impl Drop for Flight<'_> {
  fn drop(&mut self) {
    if !self.released {
      self.group.take(self.key);
    }
  }
}

impl SingleFlight {
  pub fn new() -> Self {
    Self::default()
  }

  fn take(&self, key: &str) -> Option<broadcast::Sender<Outcome>> {
    self
      .in_flight
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .remove(key)
  }

  /// Run `fetch` unless a request for `key` is already in flight, in which case wait for
  /// and share its outcome.
  pub async fn run<F, Fut>(&self, key: &str, fetch: F) -> Result<ResponseSnapshot>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ResponseSnapshot>>,
  {
    let follower = {
      let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
      match in_flight.get(key) {
        Some(tx) => Some(tx.subscribe()),
        None => {
          let (tx, _rx) = broadcast::channel(1);
          in_flight.insert(key.to_string(), tx);
          None
        }
      }
    };

    if let Some(mut rx) = follower {
      return match rx.recv().await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(message)) => Err(eyre!(message)),
        Err(_) => Err(eyre!("In-flight request for {} was abandoned", key)),
      };
    }

    let flight = Flight {
      group: self,
      key,
      released: false,
    };
    let result = fetch().await;
    flight.finish(match &result {
      Ok(response) => Ok(response.clone()),
      Err(e) => Err(e.to_string()),
    });
    result
  }

  pub fn in_flight(&self) -> usize {
    self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
  }
}
