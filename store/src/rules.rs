use std::collections::HashMap;

use serde_json::Value;
use store_api::{StoreError, StoreResult};

/// Access control evaluated by the store on every call.
#[derive(Debug, Clone, Default)]
pub struct Rules {
    owners: HashMap<String, String>,
    denied: Vec<String>,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the connection whose auth uid equals `field` of the stored
    /// document may update or delete it.
    pub fn owner_field(mut self, collection: &str, field: &str) -> Self {
        self.owners.insert(collection.into(), field.into());
        self
    }

    /// Refuse every read and write at or below `prefix`.
    pub fn deny(mut self, prefix: &str) -> Self {
        self.add_denied(prefix);
        self
    }

    pub(crate) fn add_denied(&mut self, prefix: &str) {
        let prefix = prefix.trim_matches('/').to_string();
        if !self.denied.contains(&prefix) {
            self.denied.push(prefix);
        }
    }

    pub fn is_denied(&self, path: &str) -> bool {
        self.denied.iter().any(|p| covers(p, path))
    }

    pub fn check_path(&self, path: &str) -> StoreResult<()> {
        if self.is_denied(path) {
            return Err(StoreError::PermissionDenied(path.into()));
        }
        Ok(())
    }

    /// Check that `auth` may mutate `existing` in `collection`.
    pub fn check_owner(
        &self,
        collection: &str,
        existing: &Value,
        auth: Option<&str>,
    ) -> StoreResult<()> {
        let Some(field) = self.owners.get(collection) else {
            return Ok(());
        };
        let owner = existing.get(field).and_then(Value::as_str);
        match (owner, auth) {
            (Some(owner), Some(uid)) if owner == uid => Ok(()),
            _ => Err(StoreError::PermissionDenied(format!(
                "{collection}: only the owner may modify this document"
            ))),
        }
    }
}

/// Whether `prefix` equals `path` or is one of its ancestors.
pub(crate) fn covers(prefix: &str, path: &str) -> bool {
    path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}
