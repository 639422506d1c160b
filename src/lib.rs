//! Client-side API cache.
//!
//! Wraps an application's fetch primitive so that:
//! - GET responses are cached by canonical request key with TTL expiry
//! - stale entries are served when the network is unreachable
//! - successful mutations invalidate related caches and patch known collections in place
//! - mutations that fail while offline are queued and replayed on reconnect

pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod http;
pub mod interceptor;
pub mod retry;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheResult, CacheSource, CacheStore, ResponseSnapshot};
pub use config::Config;
pub use connectivity::Connectivity;
pub use http::{Fetcher, HttpTransport, Method, Request, Transport};
pub use interceptor::Interceptor;
pub use retry::{DrainReport, RetryQueue, RetryQueueItem};
pub use storage::{DurableStorage, MemoryStorage, NoopStorage, SqliteStorage};
