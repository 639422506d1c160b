//! Bounded in-memory response store with per-entry expiry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::key::key_path;
use super::snapshot::ResponseSnapshot;
use crate::clock::Clock;
use crate::storage::DurableStorage;

/// Durable storage key for the diagnostics metadata written on every insert.
pub const CACHE_META_KEY: &str = "apicache:cache_meta";

/// A cached response and its absolute expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: String,
  pub response: ResponseSnapshot,
  pub expires_at: DateTime<Utc>,
}

/// Diagnostics metadata persisted after each insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
  pub size: usize,
  /// Milliseconds since the Unix epoch
  pub timestamp: i64,
}

/// Counters describing store activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub size: usize,
  pub capacity: usize,
  pub hits: u64,
  pub misses: u64,
  pub evictions: u64,
  pub expired: u64,
}

#[derive(Default)]
struct StoreInner {
  entries: HashMap<String, CacheEntry>,
  stats: CacheStats,
}

/// Response store keyed by canonical request key.
///
/// Size never exceeds `max_size`. Inserting a new key at capacity evicts the entry that
/// expires soonest, which is not the same as least recently used.
pub struct CacheStore {
  inner: Mutex<StoreInner>,
  default_ttl: Duration,
  max_size: usize,
  clock: Arc<dyn Clock>,
  storage: Arc<dyn DurableStorage>,
}

impl CacheStore {
  pub fn new(
    default_ttl: Duration,
    max_size: usize,
    clock: Arc<dyn Clock>,
    storage: Arc<dyn DurableStorage>,
  ) -> Self {
    Self {
      inner: Mutex::new(StoreInner::default()),
      default_ttl,
      max_size: max_size.max(1),
      clock,
      storage,
    }
  }

  // Critical sections never await, so a poisoned lock still holds consistent maps.
  fn lock(&self) -> MutexGuard<'_, StoreInner> {
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn capacity(&self) -> usize {
    self.max_size
  }

  /// Store a response, expiring `ttl` (or the default TTL) from now.
  pub fn set(&self, key: &str, response: ResponseSnapshot, ttl: Option<Duration>) {
    let now = self.clock.now();
    let expires_at = now + ttl.unwrap_or(self.default_ttl);

    let size = {
      let mut inner = self.lock();

      if !inner.entries.contains_key(key) {
        while inner.entries.len() >= self.max_size {
          let Some(victim) = soonest_to_expire(&inner.entries) else {
            break;
          };
          inner.entries.remove(&victim);
          inner.stats.evictions += 1;
          debug!(key = %victim, "Evicted cache entry under size pressure");
        }
      }

      inner.entries.insert(
        key.to_string(),
        CacheEntry {
          key: key.to_string(),
          response,
          expires_at,
        },
      );
      inner.entries.len()
    };

    self.persist_meta(size, now);
  }

  /// Fresh-only read. An expired entry is removed and reported as a miss.
  pub fn get(&self, key: &str) -> Option<CacheEntry> {
    let now = self.clock.now();
    let mut inner = self.lock();

    let expires_at = match inner.entries.get(key) {
      Some(entry) => entry.expires_at,
      None => {
        inner.stats.misses += 1;
        return None;
      }
    };

    if now > expires_at {
      inner.entries.remove(key);
      inner.stats.misses += 1;
      inner.stats.expired += 1;
      return None;
    }

    inner.stats.hits += 1;
    inner.entries.get(key).cloned()
  }

  /// Read regardless of expiry. Never removes anything.
  pub fn get_stale(&self, key: &str) -> Option<CacheEntry> {
    self.lock().entries.get(key).cloned()
  }

  /// Remove an entry. Returns whether it existed.
  pub fn delete(&self, key: &str) -> bool {
    self.lock().entries.remove(key).is_some()
  }

  /// Remove every entry whose expiry has passed. Returns the number removed.
  pub fn cleanup(&self) -> usize {
    let now = self.clock.now();
    let mut inner = self.lock();

    let before = inner.entries.len();
    inner.entries.retain(|_, entry| now <= entry.expires_at);
    let removed = before - inner.entries.len();
    inner.stats.expired += removed as u64;

    removed
  }

  /// Remove every entry whose key path starts with `prefix`. Returns the number removed.
  pub fn invalidate_related(&self, prefix: &str) -> usize {
    let mut inner = self.lock();

    let before = inner.entries.len();
    inner
      .entries
      .retain(|key, _| !key_path(key).starts_with(prefix));

    before - inner.entries.len()
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn contains(&self, key: &str) -> bool {
    self.lock().entries.contains_key(key)
  }

  /// All keys, sorted.
  pub fn keys(&self) -> Vec<String> {
    let mut keys: Vec<String> = self.lock().entries.keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn clear(&self) {
    self.lock().entries.clear();
  }

  pub fn stats(&self) -> CacheStats {
    let inner = self.lock();
    CacheStats {
      size: inner.entries.len(),
      capacity: self.max_size,
      ..inner.stats
    }
  }

  /// Read the diagnostics metadata last persisted by any store sharing `storage`.
  pub fn load_meta(storage: &dyn DurableStorage) -> Option<CacheMeta> {
    let raw = match storage.get(CACHE_META_KEY) {
      Ok(raw) => raw?,
      Err(e) => {
        warn!("Failed to read cache metadata: {}", e);
        return None;
      }
    };
    serde_json::from_str(&raw).ok()
  }

  fn persist_meta(&self, size: usize, now: DateTime<Utc>) {
    let meta = CacheMeta {
      size,
      timestamp: now.timestamp_millis(),
    };

    let result = serde_json::to_string(&meta)
      .map_err(|e| color_eyre::eyre::eyre!("Failed to serialize cache metadata: {}", e))
      .and_then(|json| self.storage.set(CACHE_META_KEY, &json));

    if let Err(e) = result {
      warn!("Cache metadata not persisted: {}", e);
    }
  }

  /// Spawn a task that runs [`CacheStore::cleanup`] every `every`.
  ///
  /// The task holds a weak reference and exits once the store is dropped.
  pub fn spawn_sweeper(self: &Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
    let store: Weak<Self> = Arc::downgrade(self);

    tokio::spawn(async move {
      let mut interval = tokio::time::interval(every);
      interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      // First tick completes immediately
      interval.tick().await;

      loop {
        interval.tick().await;
        let Some(store) = store.upgrade() else {
          break;
        };
        let removed = store.cleanup();
        if removed > 0 {
          debug!(removed, "Swept expired cache entries");
        }
      }
    })
  }
}

fn soonest_to_expire(entries: &HashMap<String, CacheEntry>) -> Option<String> {
  entries
    .values()
    .min_by_key(|entry| entry.expires_at)
    .map(|entry| entry.key.clone())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::storage::{MemoryStorage, NoopStorage};
  use crate::testing::FailingStorage;
  use serde_json::json;

  fn response(n: i64) -> ResponseSnapshot {
    ResponseSnapshot::json(200, &json!({ "n": n }))
  }

  fn store_with(clock: Arc<ManualClock>, max_size: usize) -> CacheStore {
    CacheStore::new(Duration::minutes(5), max_size, clock, Arc::new(NoopStorage))
  }

  #[test]
  fn test_get_fresh_entry() {
    let clock = Arc::new(ManualClock::default());
    let store = store_with(clock.clone(), 100);

    store.set("/api/jobs?", response(1), None);
    let entry = store.get("/api/jobs?").unwrap();
    assert_eq!(entry.response, response(1));
    assert_eq!(entry.expires_at, clock.now() + Duration::minutes(5));
  }

  #[test]
  fn test_get_at_exact_expiry_is_fresh() {
    let clock = Arc::new(ManualClock::default());
    let store = store_with(clock.clone(), 100);

    store.set("k", response(1), Some(Duration::seconds(10)));
    clock.advance(Duration::seconds(10));
    assert!(store.get("k").is_some());
  }

  #[test]
  fn test_get_past_expiry_deletes() {
    let clock = Arc::new(ManualClock::default());
    let store = store_with(clock.clone(), 100);

    store.set("k", response(1), Some(Duration::seconds(10)));
    clock.advance(Duration::seconds(11));

    assert!(store.get("k").is_none());
    // The fresh read removed it, so even a stale read misses now
    assert!(store.get_stale("k").is_none());
  }

  #[test]
  fn test_get_stale_alone_keeps_expired_entry() {
    let clock = Arc::new(ManualClock::default());
    let store = store_with(clock.clone(), 100);

    store.set("k", response(1), Some(Duration::seconds(10)));
    clock.advance(Duration::minutes(30));

    assert!(store.get_stale("k").is_some());
    assert!(store.get_stale("k").is_some());
    assert!(store.contains("k"));
  }

  #[test]
  fn test_set_replaces_and_refreshes_expiry() {
    let clock = Arc::new(ManualClock::default());
    let store = store_with(clock.clone(), 100);

    store.set("k", response(1), Some(Duration::seconds(10)));
    clock.advance(Duration::seconds(8));
    store.set("k", response(2), Some(Duration::seconds(10)));
    clock.advance(Duration::seconds(8));

    assert_eq!(store.get("k").unwrap().response, response(2));
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn test_overflow_evicts_soonest_to_expire() {
    let clock = Arc::new(ManualClock::default());
    let store = store_with(clock.clone(), 100);

    // Entry 37 gets the shortest TTL even though it is not the oldest insert
    for i in 0..100 {
      let ttl = if i == 37 {
        Duration::seconds(30)
      } else {
        Duration::minutes(5) + Duration::seconds(i)
      };
      store.set(&format!("/api/jobs?page={}", i), response(i), Some(ttl));
    }
    assert_eq!(store.len(), 100);

    store.set("/api/jobs?page=100", response(100), None);

    assert_eq!(store.len(), 100);
    assert!(!store.contains("/api/jobs?page=37"));
    assert!(store.contains("/api/jobs?page=0"));
    assert!(store.contains("/api/jobs?page=100"));
    assert_eq!(store.stats().evictions, 1);
  }

  #[test]
  fn test_eviction_ignores_access_recency() {
    let clock = Arc::new(ManualClock::default());
    let store = store_with(clock.clone(), 2);

    store.set("a", response(1), Some(Duration::seconds(10)));
    store.set("b", response(2), Some(Duration::seconds(20)));
    // Reading "a" does not protect it: eviction is by expiry, not recency
    assert!(store.get("a").is_some());

    store.set("c", response(3), Some(Duration::seconds(30)));
    assert!(!store.contains("a"));
    assert!(store.contains("b"));
    assert!(store.contains("c"));
  }

  #[test]
  fn test_replace_at_capacity_does_not_evict() {
    let clock = Arc::new(ManualClock::default());
    let store = store_with(clock, 2);

    store.set("a", response(1), None);
    store.set("b", response(2), None);
    store.set("a", response(3), None);

    assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(store.stats().evictions, 0);
  }

  #[test]
  fn test_cleanup_removes_only_expired() {
    let clock = Arc::new(ManualClock::default());
    let store = store_with(clock.clone(), 100);

    store.set("short", response(1), Some(Duration::seconds(5)));
    store.set("long", response(2), Some(Duration::minutes(10)));
    clock.advance(Duration::seconds(6));

    assert_eq!(store.cleanup(), 1);
    assert_eq!(store.keys(), vec!["long".to_string()]);
  }

  #[test]
  fn test_invalidate_related_by_path_prefix() {
    let clock = Arc::new(ManualClock::default());
    let store = store_with(clock, 100);

    store.set("/api/expenses?", response(1), None);
    store.set("/api/expenses?page=2", response(2), None);
    store.set("/api/expenses/42?", response(3), None);
    store.set("/api/jobs?", response(4), None);
    // Query text is not part of the match
    store.set("/api/reports?from=/api/expenses", response(5), None);

    assert_eq!(store.invalidate_related("/api/expenses"), 3);
    assert_eq!(
      store.keys(),
      vec![
        "/api/jobs?".to_string(),
        "/api/reports?from=/api/expenses".to_string()
      ]
    );
  }

  #[test]
  fn test_delete() {
    let clock = Arc::new(ManualClock::default());
    let store = store_with(clock, 100);

    store.set("k", response(1), None);
    assert!(store.delete("k"));
    assert!(!store.delete("k"));
    assert!(store.is_empty());
  }

  #[test]
  fn test_set_persists_meta() {
    let clock = Arc::new(ManualClock::default());
    let storage = Arc::new(MemoryStorage::new());
    let store = CacheStore::new(Duration::minutes(5), 100, clock.clone(), storage.clone());

    store.set("a", response(1), None);
    store.set("b", response(2), None);

    let meta = CacheStore::load_meta(storage.as_ref()).unwrap();
    assert_eq!(meta.size, 2);
    assert_eq!(meta.timestamp, clock.now().timestamp_millis());
  }

  #[test]
  fn test_storage_failure_is_swallowed() {
    let clock = Arc::new(ManualClock::default());
    let store = CacheStore::new(Duration::minutes(5), 100, clock, Arc::new(FailingStorage));

    store.set("a", response(1), None);
    assert!(store.get("a").is_some());
  }

  #[test]
  fn test_stats_counts() {
    let clock = Arc::new(ManualClock::default());
    let store = store_with(clock, 100);

    store.set("a", response(1), None);
    store.get("a");
    store.get("missing");
    store.get_stale("a");

    let stats = store.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.size, 1);
    assert_eq!(stats.capacity, 100);
  }

  #[tokio::test(start_paused = true)]
  async fn test_sweeper_removes_expired_entries() {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(store_with(clock.clone(), 100));

    store.set("k", response(1), Some(Duration::seconds(10)));
    let sweeper = store.spawn_sweeper(std::time::Duration::from_secs(60));

    clock.advance(Duration::seconds(11));
    // Nothing reads "k"; only the sweep can remove it
    tokio::time::sleep(std::time::Duration::from_secs(61)).await;
    tokio::task::yield_now().await;

    assert!(!store.contains("k"));
    sweeper.abort();
  }
}
