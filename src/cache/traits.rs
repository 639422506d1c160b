//! Result metadata for intercepted requests.

use chrono::{DateTime, Utc};

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the served cache entry expires (if from cache)
  pub expires_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      expires_at: None,
    }
  }

  /// Create a new cache result from a fresh cache entry.
  pub fn from_cache(data: T, expires_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      expires_at: Some(expires_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, expires_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      expires_at: Some(expires_at),
    }
  }

  pub fn is_from_cache(&self) -> bool {
    self.source != CacheSource::Network
  }
}

/// Indicates where response data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Data from the network
  Network,
  /// Data from cache, still within its TTL
  CacheFresh,
  /// Offline mode - network request failed, serving a possibly stale entry
  Offline,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CacheSource::Network => write!(f, "network"),
      CacheSource::CacheFresh => write!(f, "cache"),
      CacheSource::Offline => write!(f, "stale cache (offline)"),
    }
  }
}
