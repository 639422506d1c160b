//! Request interceptor that makes caching transparent to callers of the fetch primitive.
//!
//! Dispatch by method:
//! - GET: fresh cache hit, else network; 2xx responses are stored; on network failure a
//!   stale entry is served if one exists
//! - POST/PUT/PATCH/DELETE: network; on 2xx related caches are invalidated and known
//!   collections patched in place; on network failure while offline the write is queued
//! - anything else: network, untouched

mod optimistic;
mod single_flight;

pub use optimistic::{OptimisticPatch, OptimisticRules};
pub use single_flight::SingleFlight;

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{
  canonical_key, related_prefix, request_path, CacheResult, CacheStore, ResponseSnapshot,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::http::{Fetcher, Request, RequestKind, Transport};
use crate::retry::{DrainReport, RetryQueue};
use crate::storage::DurableStorage;

#[derive(Default)]
struct Installation {
  /// Transport the fetcher used before install
  previous: Option<Arc<dyn Transport>>,
  tasks: Vec<JoinHandle<()>>,
}

/// Caching wrapper around a network transport.
pub struct Interceptor {
  origin: Url,
  api_prefix: String,
  network: Arc<dyn Transport>,
  store: Arc<CacheStore>,
  queue: Arc<RetryQueue>,
  connectivity: Connectivity,
  optimistic: OptimisticRules,
  single_flight: Option<SingleFlight>,
  cleanup_interval: std::time::Duration,
  installation: Mutex<Installation>,
}

impl Interceptor {
  /// Assemble an interceptor from explicit parts.
  ///
  /// `network` is the transport real requests go to, normally the fetcher's current one.
  pub fn new(
    config: &Config,
    network: Arc<dyn Transport>,
    store: Arc<CacheStore>,
    queue: Arc<RetryQueue>,
    connectivity: Connectivity,
  ) -> Result<Arc<Self>> {
    Ok(Arc::new(Self {
      origin: config.origin()?,
      api_prefix: config.optimistic.api_prefix.clone(),
      network,
      store,
      queue,
      connectivity,
      optimistic: OptimisticRules::new(&config.optimistic),
      single_flight: config.cache.single_flight.then(SingleFlight::new),
      cleanup_interval: config.cache.cleanup_interval(),
      installation: Mutex::new(Installation::default()),
    }))
  }

  /// Build store and queue from config, wrap the fetcher's current transport and install.
  pub fn attach(
    fetcher: &Fetcher,
    config: &Config,
    storage: Arc<dyn DurableStorage>,
    connectivity: Connectivity,
  ) -> Result<Arc<Self>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(CacheStore::new(
      config.cache.default_ttl(),
      config.cache.max_size,
      clock.clone(),
      storage.clone(),
    ));
    let queue = Arc::new(RetryQueue::load(storage, clock, config.retry.max_retries));

    let interceptor = Self::new(config, fetcher.current(), store, queue, connectivity)?;
    interceptor.install(fetcher)?;
    Ok(interceptor)
  }

  fn installation(&self) -> MutexGuard<'_, Installation> {
    self.installation.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn store(&self) -> &Arc<CacheStore> {
    &self.store
  }

  pub fn queue(&self) -> &Arc<RetryQueue> {
    &self.queue
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  pub fn is_installed(&self) -> bool {
    self.installation().previous.is_some()
  }

  /// Route the fetcher through this interceptor.
  ///
  /// Starts the cleanup sweeper and a listener that drains the retry queue whenever
  /// connectivity comes back. Must be called from within a tokio runtime.
  pub fn install(self: &Arc<Self>, fetcher: &Fetcher) -> Result<()> {
    let mut installation = self.installation();
    if installation.previous.is_some() {
      return Err(eyre!("Interceptor is already installed"));
    }

    let this: Arc<dyn Transport> = self.clone();
    installation.previous = Some(fetcher.replace(this));
    installation.tasks = vec![
      self.store.spawn_sweeper(self.cleanup_interval),
      self.spawn_reconnect_listener(),
    ];

    info!(origin = %self.origin, "Installed API cache");
    Ok(())
  }

  /// Restore the fetcher's original transport and stop background tasks.
  ///
  /// Returns false if the interceptor was not installed.
  pub fn uninstall(&self, fetcher: &Fetcher) -> bool {
    let mut installation = self.installation();
    let Some(previous) = installation.previous.take() else {
      return false;
    };

    fetcher.replace(previous);
    for task in installation.tasks.drain(..) {
      task.abort();
    }

    info!("Uninstalled API cache");
    true
  }

  fn spawn_reconnect_listener(self: &Arc<Self>) -> JoinHandle<()> {
    let interceptor: Weak<Self> = Arc::downgrade(self);
    let mut rx = self.connectivity.subscribe();

    tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if !online {
          continue;
        }
        let Some(interceptor) = interceptor.upgrade() else {
          break;
        };
        interceptor.drain_retry_queue().await;
      }
    })
  }

  /// Dispatch a request and report where the response came from.
  pub async fn fetch(&self, request: &Request) -> Result<CacheResult<ResponseSnapshot>> {
    match request.method.kind() {
      RequestKind::Read => self.fetch_read(request).await,
      RequestKind::Mutation => self
        .fetch_mutation(request, true)
        .await
        .map(CacheResult::from_network),
      RequestKind::Bypass => self
        .network
        .send(request)
        .await
        .map(CacheResult::from_network),
    }
  }

  async fn fetch_read(&self, request: &Request) -> Result<CacheResult<ResponseSnapshot>> {
    let key = canonical_key(&self.origin, &request.url)?;

    // A fresh-only read deletes an expired entry; keep it around as the offline fallback
    let fallback = self.store.get_stale(&key);

    if let Some(entry) = self.store.get(&key) {
      debug!(%key, "Cache hit");
      return Ok(CacheResult::from_cache(entry.response, entry.expires_at));
    }
    debug!(%key, "Cache miss");

    let result = match &self.single_flight {
      Some(group) => group.run(&key, || self.network.send(request)).await,
      None => self.network.send(request).await,
    };

    match result {
      Ok(response) => {
        if response.is_success() {
          self.store.set(&key, response.clone(), None);
        }
        Ok(CacheResult::from_network(response))
      }
      Err(err) => match self.store.get_stale(&key).or(fallback) {
        Some(entry) => {
          warn!(%key, error = %err, "Network request failed, serving cached response");
          Ok(CacheResult::offline(entry.response, entry.expires_at))
        }
        None => Err(err),
      },
    }
  }

  async fn fetch_mutation(
    &self,
    request: &Request,
    queue_when_offline: bool,
  ) -> Result<ResponseSnapshot> {
    match self.network.send(request).await {
      Ok(response) => {
        if response.is_success() {
          self.after_write(request);
        }
        Ok(response)
      }
      Err(err) => {
        if queue_when_offline && !self.connectivity.is_online() {
          self.queue.enqueue(request.clone());
        }
        Err(err)
      }
    }
  }

  /// Invalidate caches related to a successful write, then apply any optimistic patch.
  fn after_write(&self, request: &Request) {
    let path = match request_path(&self.origin, &request.url) {
      Ok(path) => path,
      Err(e) => {
        debug!("Skipping cache bookkeeping: {}", e);
        return;
      }
    };

    // Read the collection before invalidation drops it
    let planned = match self
      .optimistic
      .plan(&request.method, &path, request.body.as_deref())
    {
      Ok(Some(patch)) => canonical_key(&self.origin, patch.collection())
        .ok()
        .and_then(|key| self.store.get(&key).map(|entry| (patch, entry))),
      Ok(None) => None,
      Err(e) => {
        debug!(%path, "Skipping optimistic update: {}", e);
        None
      }
    };

    let prefix = related_prefix(&path, &self.api_prefix);
    let removed = self.store.invalidate_related(&prefix);
    debug!(%prefix, removed, "Invalidated related cache entries");

    let Some((patch, entry)) = planned else {
      return;
    };
    match self.optimistic.apply(&patch, &entry.response) {
      Ok(Some(patched)) => {
        self.store.set(&entry.key, patched, None);
        debug!(key = %entry.key, "Applied optimistic update");
      }
      Ok(None) => debug!(key = %entry.key, "No cached item to patch, leaving it invalidated"),
      Err(e) => debug!(key = %entry.key, "Skipping optimistic update: {}", e),
    }
  }

  /// Replay queued writes through the mutation path without re-queueing them.
  pub async fn drain_retry_queue(&self) -> DrainReport {
    self
      .queue
      .drain(self.connectivity.is_online(), |request| async move {
        self.fetch_mutation(&request, false).await
      })
      .await
  }
}

impl Transport for Interceptor {
  fn send<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<ResponseSnapshot>> {
    Box::pin(async move { self.fetch(request).await.map(|result| result.data) })
  }
}
