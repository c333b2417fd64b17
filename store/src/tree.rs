use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use store_api::{is_valid_key, Keyed, StoreError, StoreResult, SERVER_TIMESTAMP_KEY};

/// JSON tree kept one level deep: every parent path maps to its children.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tree {
    nodes: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Children of `parent` in key order.
    pub fn children(&self, parent: &str) -> Vec<Keyed<Value>> {
        self.nodes
            .get(parent)
            .map(|kids| {
                kids.iter()
                    .map(|(id, value)| Keyed {
                        id: id.clone(),
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, parent: &str, key: &str) -> Option<&Value> {
        self.nodes.get(parent).and_then(|kids| kids.get(key))
    }

    pub fn insert(&mut self, parent: &str, key: &str, value: Value) {
        self.nodes
            .entry(parent.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn remove(&mut self, parent: &str, key: &str) -> Option<Value> {
        let kids = self.nodes.get_mut(parent)?;
        let removed = kids.remove(key);
        if kids.is_empty() {
            self.nodes.remove(parent);
        }
        removed
    }

    /// Copy of the tree without the given full paths.
    pub fn without(&self, skip: &BTreeSet<String>) -> Tree {
        let mut out = self.clone();
        for full in skip {
            if let Some((parent, key)) = full.rsplit_once('/') {
                out.remove(parent, key);
            }
        }
        out
    }
}

/// Validate a slash separated path and strip outer slashes.
pub fn normalize(path: &str) -> StoreResult<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.split('/').all(is_valid_key) {
        Ok(trimmed.to_string())
    } else {
        Err(StoreError::Transport(format!("invalid path: {path:?}")))
    }
}

/// Split a path into its parent and last segment. The path needs at least
/// two segments.
pub fn split_path(path: &str) -> StoreResult<(String, String)> {
    let path = normalize(path)?;
    match path.rsplit_once('/') {
        Some((parent, key)) => Ok((parent.to_string(), key.to_string())),
        None => Err(StoreError::Transport(format!(
            "path {path:?} has no parent"
        ))),
    }
}

/// Replace every `{".sv":"timestamp"}` placeholder with `now_ms`.
pub fn resolve_server_values(value: &mut Value, now_ms: i64) {
    match value {
        Value::Object(map) => {
            let is_placeholder = map.len() == 1
                && map.get(SERVER_TIMESTAMP_KEY).and_then(Value::as_str) == Some("timestamp");
            if is_placeholder {
                *value = Value::from(now_ms);
            } else {
                for child in map.values_mut() {
                    resolve_server_values(child, now_ms);
                }
            }
        }
        Value::Array(items) => {
            for child in items {
                resolve_server_values(child, now_ms);
            }
        }
        _ => {}
    }
}
