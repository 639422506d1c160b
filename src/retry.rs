//! Durable queue of writes that failed while offline.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::cache::ResponseSnapshot;
use crate::clock::Clock;
use crate::http::Request;
use crate::storage::DurableStorage;

/// Durable storage key holding the JSON-encoded queue.
pub const RETRY_QUEUE_KEY: &str = "apicache:retry_queue";

/// A write waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryQueueItem {
  /// Creation time in milliseconds since the Unix epoch, unique within the queue
  pub id: i64,
  pub request: Request,
  pub created_at: DateTime<Utc>,
  pub retry_count: u32,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Replayed successfully and removed
  pub succeeded: usize,
  /// Failed and kept for the next drain
  pub retried: usize,
  /// Failed with the retry budget exhausted and removed
  pub dropped: usize,
  /// Drain skipped because connectivity was offline
  pub skipped_offline: bool,
}

/// Queue of failed writes, persisted after every change.
pub struct RetryQueue {
  items: Mutex<Vec<RetryQueueItem>>,
  storage: Arc<dyn DurableStorage>,
  clock: Arc<dyn Clock>,
  max_retries: u32,
  draining: tokio::sync::Mutex<()>,
}

impl RetryQueue {
  /// Create a queue, restoring any items persisted by an earlier process.
  pub fn load(storage: Arc<dyn DurableStorage>, clock: Arc<dyn Clock>, max_retries: u32) -> Self {
    let items = match Self::read_persisted(storage.as_ref()) {
      Ok(items) => items,
      Err(e) => {
        warn!("Starting with an empty retry queue: {}", e);
        Vec::new()
      }
    };

    if !items.is_empty() {
      info!(pending = items.len(), "Restored retry queue");
    }

    Self {
      items: Mutex::new(items),
      storage,
      clock,
      max_retries,
      draining: tokio::sync::Mutex::new(()),
    }
  }

  fn read_persisted(storage: &dyn DurableStorage) -> Result<Vec<RetryQueueItem>> {
    match storage.get(RETRY_QUEUE_KEY)? {
      Some(raw) => serde_json::from_str(&raw)
        .map_err(|e| eyre!("Failed to parse persisted retry queue: {}", e)),
      None => Ok(Vec::new()),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Vec<RetryQueueItem>> {
    self.items.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn persist(&self, items: &[RetryQueueItem]) {
    let result = serde_json::to_string(items)
      .map_err(|e| eyre!("Failed to serialize retry queue: {}", e))
      .and_then(|json| self.storage.set(RETRY_QUEUE_KEY, &json));

    if let Err(e) = result {
      warn!("Retry queue not persisted: {}", e);
    }
  }

  /// Append a request with `retry_count = 0`.
  pub fn enqueue(&self, request: Request) -> RetryQueueItem {
    let now = self.clock.now();
    let mut items = self.lock();

    // Same-millisecond writes get the next free id
    let last_id = items.iter().map(|item| item.id).max();
    let id = match last_id {
      Some(last) if last >= now.timestamp_millis() => last + 1,
      _ => now.timestamp_millis(),
    };

    let item = RetryQueueItem {
      id,
      request,
      created_at: now,
      retry_count: 0,
    };
    items.push(item.clone());
    self.persist(&items);

    info!(
      id,
      method = %item.request.method,
      url = %item.request.url,
      "Queued request for retry"
    );
    item
  }

  /// Snapshot of pending items in enqueue order.
  pub fn items(&self) -> Vec<RetryQueueItem> {
    self.lock().clone()
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  pub fn clear(&self) {
    let mut items = self.lock();
    items.clear();
    self.persist(&items);
  }

  /// Replay queued requests in enqueue order.
  ///
  /// Does nothing while offline. A request succeeds when `send` resolves with a 2xx
  /// response; the item is then removed. On failure `retry_count` is incremented and the
  /// item is dropped once it reaches `max_retries`. Concurrent drains run one at a time.
  pub async fn drain<F, Fut>(&self, online: bool, mut send: F) -> DrainReport
  where
    F: FnMut(Request) -> Fut,
    Fut: Future<Output = Result<ResponseSnapshot>>,
  {
    if !online {
      debug!("Offline, skipping retry queue drain");
      return DrainReport {
        skipped_offline: true,
        ..DrainReport::default()
      };
    }

    let _draining = self.draining.lock().await;
    let pending = self.items();
    let mut report = DrainReport::default();

    for item in pending {
      let outcome = send(item.request.clone()).await;
      let delivered = match &outcome {
        Ok(response) => response.is_success(),
        Err(_) => false,
      };

      let mut items = self.lock();
      // Cleared while the request was in flight
      let Some(position) = items.iter().position(|queued| queued.id == item.id) else {
        continue;
      };

      if delivered {
        items.remove(position);
        report.succeeded += 1;
        debug!(id = item.id, "Replayed queued request");
      } else {
        let queued = &mut items[position];
        queued.retry_count += 1;

        if queued.retry_count >= self.max_retries {
          let dropped = items.remove(position);
          report.dropped += 1;
          warn!(
            id = dropped.id,
            method = %dropped.request.method,
            url = %dropped.request.url,
            attempts = dropped.retry_count,
            "Dropping queued request after exhausting retries"
          );
        } else {
          report.retried += 1;
        }
      }

      self.persist(&items);
    }

    if report.succeeded + report.retried + report.dropped > 0 {
      info!(
        succeeded = report.succeeded,
        retried = report.retried,
        dropped = report.dropped,
        "Drained retry queue"
      );
    }
    report
  }
}
