//! Display name → canonical key resolution.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use {
    meshtrace_common::{
        NodeIdentity,
        names::{
            UNKNOWN_ID, clean_contact_name, sanitize_name, strip_contact_suffix, truncate_chars,
        },
    },
    tracing::debug,
};

use crate::registry::NodeRegistry;

/// Cache-backed resolver from sender display names to registry keys.
///
/// Lookup order: exact name, lowercase name, ASCII-sanitized name. On a total
/// miss the cache is rebuilt from the registry (at most once per throttle
/// window) and the lookup is retried once. Fuzzy hits are memoized under the
/// caller's original spelling.
pub struct IdentityResolver {
    registry: Arc<dyn NodeRegistry>,
    /// Display name (as-is and lowercase) → key.
    names: HashMap<String, String>,
    /// Sanitized name → key. First key in registry order wins.
    sanitized: BTreeMap<String, String>,
    last_rebuild_ms: Option<u64>,
    rebuild_throttle_ms: u64,
    rebuilds: u64,
}

impl IdentityResolver {
    pub fn new(registry: Arc<dyn NodeRegistry>, rebuild_throttle_ms: u64) -> Self {
        Self {
            registry,
            names: HashMap::new(),
            sanitized: BTreeMap::new(),
            last_rebuild_ms: None,
            rebuild_throttle_ms,
            rebuilds: 0,
        }
    }

    /// Resolve a display name. Never fails; `None` means "use a pseudo-key".
    pub fn resolve(&mut self, display_name: &str, now_ms: u64) -> Option<String> {
        let name = display_name.trim();
        if name.is_empty() {
            return None;
        }
        if let Some(key) = self.lookup(name) {
            return Some(key);
        }
        if !self.rebuild_due(now_ms) {
            return None;
        }
        self.rebuild(now_ms);
        self.lookup(name)
    }

    /// Rebuild the cache from the registry and return the number of names.
    pub fn rebuild(&mut self, now_ms: u64) -> usize {
        self.names.clear();
        self.sanitized.clear();
        for node in self.registry.list() {
            self.observe_contact(&node);
        }
        self.last_rebuild_ms = Some(now_ms);
        self.rebuilds += 1;
        debug!(
            names = self.names.len(),
            rebuilds = self.rebuilds,
            "identity cache rebuilt"
        );
        self.names.len()
    }

    /// Add a node's name variants to the cache without a full rebuild.
    pub fn observe_contact(&mut self, node: &NodeIdentity) {
        let variants = [
            node.name.trim().to_string(),
            strip_contact_suffix(&node.name),
            clean_contact_name(&node.name),
        ];
        for variant in variants {
            if variant.is_empty() {
                continue;
            }
            let sanitized = sanitize_name(&variant);
            if sanitized != UNKNOWN_ID {
                self.sanitized
                    .entry(sanitized)
                    .or_insert_with(|| node.key.clone());
            }
            self.names.insert(variant.to_lowercase(), node.key.clone());
            self.names.insert(variant, node.key.clone());
        }
    }

    /// Registry name for `key`, or `Unknown (<first 8 of key>)`.
    pub fn display_name(&self, key: &str) -> String {
        let key = key.trim().to_lowercase();
        self.registry
            .get(&key)
            .or_else(|| self.registry.query_by_prefix(&key))
            .map(|node| strip_contact_suffix(&node.name))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("Unknown ({})", truncate_chars(&key, 8)))
    }

    /// Number of rebuilds performed so far.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    fn rebuild_due(&self, now_ms: u64) -> bool {
        self.last_rebuild_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.rebuild_throttle_ms)
    }

    fn lookup(&mut self, name: &str) -> Option<String> {
        if let Some(key) = self.names.get(name) {
            return Some(key.clone());
        }
        let key = self
            .names
            .get(&name.to_lowercase())
            .cloned()
            .or_else(|| {
                let sanitized = sanitize_name(name);
                if sanitized == UNKNOWN_ID {
                    None
                } else {
                    self.sanitized.get(&sanitized).cloned()
                }
            })?;
        self.names.insert(name.to_string(), key.clone());
        Some(key)
    }
}
