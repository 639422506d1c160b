//! In-place patches of cached collections after successful writes.
//!
//! Only configured collection endpoints are patched:
//! - `POST {collection}` prepends the request body to the cached array
//! - `PUT`/`PATCH {collection}/{id}` shallow-merges the request body into the matching item

use color_eyre::{eyre::eyre, Result};
use serde_json::{Map, Value};

use crate::cache::ResponseSnapshot;
use crate::config::OptimisticConfig;
use crate::http::Method;

/// A planned patch to one cached collection.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimisticPatch {
  Prepend {
    collection: String,
    item: Value,
  },
  Merge {
    collection: String,
    id: String,
    fields: Map<String, Value>,
  },
}

impl OptimisticPatch {
  /// Collection endpoint whose cached listing is patched.
  pub fn collection(&self) -> &str {
    match self {
      OptimisticPatch::Prepend { collection, .. } => collection,
      OptimisticPatch::Merge { collection, .. } => collection,
    }
  }
}

#[derive(Debug, Clone)]
pub struct OptimisticRules {
  id_field: String,
  collections: Vec<String>,
}

impl OptimisticRules {
  pub fn new(config: &OptimisticConfig) -> Self {
    Self {
      id_field: config.id_field.clone(),
      collections: config
        .collections
        .iter()
        .map(|c| c.trim_end_matches('/').to_string())
        .collect(),
    }
  }

  /// Work out the patch for a successful write, if any.
  ///
  /// Returns `Ok(None)` when the write does not target a known collection, and an error
  /// when it does but the body is not usable JSON.
  pub fn plan(
    &self,
    method: &Method,
    path: &str,
    body: Option<&str>,
  ) -> Result<Option<OptimisticPatch>> {
    let path = path.trim_end_matches('/');

    match method {
      Method::Post => {
        let Some(collection) = self.collections.iter().find(|c| c.as_str() == path) else {
          return Ok(None);
        };
        let item = parse_body(body)?;
        Ok(Some(OptimisticPatch::Prepend {
          collection: collection.clone(),
          item,
        }))
      }
      Method::Put | Method::Patch => {
        let Some((collection, id)) = self.split_item_path(path) else {
          return Ok(None);
        };
        let fields = match parse_body(body)? {
          Value::Object(fields) => fields,
          other => return Err(eyre!("Expected a JSON object patch, got {}", other)),
        };
        Ok(Some(OptimisticPatch::Merge {
          collection: collection.to_string(),
          id: id.to_string(),
          fields,
        }))
      }
      _ => Ok(None),
    }
  }

  fn split_item_path<'a>(&'a self, path: &'a str) -> Option<(&'a str, &'a str)> {
    self.collections.iter().find_map(|collection| {
      let id = path
        .strip_prefix(collection.as_str())?
        .strip_prefix('/')?;
      if id.is_empty() || id.contains('/') {
        None
      } else {
        Some((collection.as_str(), id))
      }
    })
  }

  /// Apply a patch to a cached collection response.
  ///
  /// Returns `Ok(None)` when a merge finds no matching item.
  pub fn apply(
    &self,
    patch: &OptimisticPatch,
    cached: &ResponseSnapshot,
  ) -> Result<Option<ResponseSnapshot>> {
    let mut items = match cached.json_body::<Value>()? {
      Value::Array(items) => items,
      _ => return Err(eyre!("Cached collection is not a JSON array")),
    };

    match patch {
      OptimisticPatch::Prepend { item, .. } => {
        items.insert(0, item.clone());
      }
      OptimisticPatch::Merge { id, fields, .. } => {
        let target = items
          .iter_mut()
          .filter_map(Value::as_object_mut)
          .find(|item| item.get(&self.id_field).is_some_and(|v| id_matches(v, id)));

        let Some(target) = target else {
          return Ok(None);
        };
        for (name, value) in fields {
          target.insert(name.clone(), value.clone());
        }
      }
    }

    let body = serde_json::to_vec(&items)
      .map_err(|e| eyre!("Failed to serialize patched collection: {}", e))?;
    Ok(Some(cached.with_body(body)))
  }
}

fn parse_body(body: Option<&str>) -> Result<Value> {
  let body = body.ok_or_else(|| eyre!("Write has no body to apply"))?;
  serde_json::from_str(body).map_err(|e| eyre!("Failed to parse request body: {}", e))
}

fn id_matches(value: &Value, id: &str) -> bool {
  match value {
    Value::String(s) => s == id,
    Value::Number(n) => n.to_string() == id,
    _ => false,
  }
}
