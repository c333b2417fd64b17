use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use store_api::Keyed;

use crate::bus::Filter;

/// Document collections keyed by collection name, then document id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Documents {
    collections: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Documents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<&Value> {
        self.collections.get(collection).and_then(|docs| docs.get(id))
    }

    /// Documents of `collection` passing `filter`.
    pub fn query(&self, collection: &str, filter: Option<&Filter>) -> Vec<Keyed<Value>> {
        let Some(docs) = self.collections.get(collection) else {
            return Vec::new();
        };
        docs.iter()
            .filter(|(_, doc)| filter.map_or(true, |f| f.matches(doc)))
            .map(|(id, doc)| Keyed {
                id: id.clone(),
                value: doc.clone(),
            })
            .collect()
    }

    pub fn insert(&mut self, collection: &str, id: &str, doc: Value) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
    }

    /// Shallow-merge `patch` into an existing document and return the result.
    pub fn merge(&mut self, collection: &str, id: &str, patch: Map<String, Value>) -> Option<Value> {
        let doc = self.collections.get_mut(collection)?.get_mut(id)?;
        let fields = doc.as_object_mut()?;
        for (k, v) in patch {
            fields.insert(k, v);
        }
        Some(doc.clone())
    }

    pub fn remove(&mut self, collection: &str, id: &str) -> Option<Value> {
        let docs = self.collections.get_mut(collection)?;
        let removed = docs.remove(id);
        if docs.is_empty() {
            self.collections.remove(collection);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_filters_by_field() {
        let mut docs = Documents::new();
        docs.insert("notes", "a", json!({"roomId": "r1"}));
        docs.insert("notes", "b", json!({"roomId": "r2"}));
        let filter = Filter {
            field: "roomId".into(),
            value: json!("r1"),
        };
        let hits = docs.query("notes", Some(&filter));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert_eq!(docs.query("notes", None).len(), 2);
    }

    #[test]
    fn merge_keeps_untouched_fields() {
        let mut docs = Documents::new();
        docs.insert("notes", "a", json!({"title": "T", "userId": "u"}));
        let mut patch = Map::new();
        patch.insert("title".into(), json!("T2"));
        let merged = docs.merge("notes", "a", patch.clone()).unwrap();
        assert_eq!(merged, json!({"title": "T2", "userId": "u"}));
        assert!(docs.merge("notes", "missing", patch).is_none());
    }
}
