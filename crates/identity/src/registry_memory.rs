//! In-memory registry for tests and config-less runs.

use std::{collections::BTreeMap, sync::Mutex};

use {
    meshtrace_common::NodeIdentity,
    serde_json::{Map, Value},
};

use crate::{
    Result,
    registry::{NodeRegistry, apply_attributes, normalize_key},
};

/// Registry backed by a `BTreeMap`. Nothing survives the process.
pub struct InMemoryRegistry {
    nodes: Mutex<BTreeMap<String, NodeIdentity>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Seed the registry with fully-formed nodes.
    pub fn with_nodes(nodes: impl IntoIterator<Item = NodeIdentity>) -> Self {
        let registry = Self::new();
        {
            let mut map = registry.nodes.lock().unwrap_or_else(|e| e.into_inner());
            for mut node in nodes {
                node.key = node.key.to_lowercase();
                map.insert(node.key.clone(), node);
            }
        }
        registry
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry for InMemoryRegistry {
    fn get(&self, key: &str) -> Option<NodeIdentity> {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes.get(&key.to_lowercase()).cloned()
    }

    fn list(&self) -> Vec<NodeIdentity> {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes.values().cloned().collect()
    }

    fn upsert(&self, key: &str, attrs: Map<String, Value>) -> Result<NodeIdentity> {
        let key = normalize_key(key)?;
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        let node = nodes
            .entry(key.clone())
            .or_insert_with(|| NodeIdentity::new(key.clone(), key));
        apply_attributes(node, attrs);
        Ok(node.clone())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, meshtrace_common::NodeClass, serde_json::json};

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn upsert_creates_then_merges() {
        let registry = InMemoryRegistry::new();
        registry
            .upsert("A1B2C3", attrs(json!({"name": "Hilltop", "node_type": "Repeater"})))
            .unwrap();
        let node = registry
            .upsert("a1b2c3", attrs(json!({"last_message": 99})))
            .unwrap();

        assert_eq!(node.name, "Hilltop");
        assert_eq!(node.node_class, NodeClass::Repeater);
        assert_eq!(node.attributes.get("last_message"), Some(&json!(99)));
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn batched_upserts_stop_at_a_bad_key() {
        let registry = InMemoryRegistry::new();
        assert_eq!(
            registry
                .upsert_many(vec![
                    ("a1".into(), attrs(json!({"name": "One"}))),
                    ("b2".into(), attrs(json!({"name": "Two"}))),
                ])
                .unwrap(),
            2
        );
        assert!(
            registry
                .upsert_many(vec![("zz".into(), attrs(json!({})))])
                .is_err()
        );
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn prefix_queries_are_ordered_by_key() {
        let registry = InMemoryRegistry::with_nodes([
            NodeIdentity::new("a1ff00", "Second"),
            NodeIdentity::new("a10000", "First"),
            NodeIdentity::new("b20000", "Other"),
        ]);
        let names: Vec<_> = registry
            .matching_prefix("A1")
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, ["First", "Second"]);
        assert_eq!(registry.query_by_prefix("a1").unwrap().name, "First");
        assert!(registry.query_by_prefix("c3").is_none());
    }
}
