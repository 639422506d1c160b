//! Canonical cache keys and path helpers.

use color_eyre::{eyre::eyre, Result};
use url::Url;

/// Build the canonical key for a request URL.
///
/// The URL is resolved against `origin`, its query pairs are stably sorted by name and the
/// key is `"{pathname}?{name=value&...}"`. Requests that differ only in parameter order
/// share a key. The host is not part of the key.
pub fn canonical_key(origin: &Url, url: &str) -> Result<String> {
  let resolved = resolve(origin, url)?;

  let mut params: Vec<(String, String)> = resolved.query_pairs().into_owned().collect();
  params.sort_by(|a, b| a.0.cmp(&b.0));

  let query = params
    .iter()
    .map(|(name, value)| format!("{}={}", name, value))
    .collect::<Vec<_>>()
    .join("&");

  Ok(format!("{}?{}", resolved.path(), query))
}

/// Resolve a request URL and return only its path.
pub fn request_path(origin: &Url, url: &str) -> Result<String> {
  Ok(resolve(origin, url)?.path().to_string())
}

/// Path component of a canonical key.
pub fn key_path(key: &str) -> &str {
  key.split_once('?').map(|(path, _)| path).unwrap_or(key)
}

/// Prefix of cache keys affected by a write to `path`.
///
/// Under `api_prefix` this is the collection root (`/api/expenses/42` -> `/api/expenses`),
/// so both the collection listing and sibling item caches are covered. Other paths
/// invalidate by their own path.
pub fn related_prefix(path: &str, api_prefix: &str) -> String {
  let api_prefix = api_prefix.trim_end_matches('/');

  let collection = path
    .strip_prefix(api_prefix)
    .and_then(|rest| rest.strip_prefix('/'))
    .and_then(|rest| rest.split('/').next())
    .filter(|segment| !segment.is_empty());

  if let Some(segment) = collection {
    return format!("{}/{}", api_prefix, segment);
  }

  match path.trim_end_matches('/') {
    "" => path.to_string(),
    trimmed => trimmed.to_string(),
  }
}

fn resolve(origin: &Url, url: &str) -> Result<Url> {
  origin
    .join(url)
    .map_err(|e| eyre!("Failed to resolve request URL '{}': {}", url, e))
}
