//! Response cache for GET requests.
//!
//! This module provides the in-memory side of the API cache:
//! - Canonical request keys that ignore query parameter order
//! - Immutable response snapshots that can be served any number of times
//! - A bounded store with per-entry expiry and evict-soonest-to-expire pressure relief
//! - A background sweeper that drops expired entries nobody reads again

mod key;
mod snapshot;
mod store;
mod traits;

pub use key::{canonical_key, key_path, related_prefix, request_path};
pub use snapshot::ResponseSnapshot;
pub use store::{CacheEntry, CacheMeta, CacheStats, CacheStore, CACHE_META_KEY};
pub use traits::{CacheResult, CacheSource};
