//! Coordinate lookup for keys, display names and path prefixes.

use std::{collections::BTreeMap, sync::Arc};

use {
    meshtrace_common::{Coordinate, NodeClass, NodeIdentity, names::clean_contact_name},
    serde::Serialize,
};

use crate::registry::{NodeRegistry, prefix_matches};

/// Where a node is and what it is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub key: String,
    pub name: String,
    pub node_class: NodeClass,
    pub coordinate: Coordinate,
}

impl Location {
    fn from_node(node: &NodeIdentity) -> Option<Self> {
        Some(Self {
            key: node.key.clone(),
            name: node.name.clone(),
            node_class: node.node_class,
            coordinate: node.coordinate?,
        })
    }
}

/// Tie-break when a prefix matches several located nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixPreference {
    /// Home node wins, then closest to home, then a repeater, then first.
    NearHome,
    /// First repeater, then first.
    Repeater,
}

/// Read-only view of the registry restricted to nodes with a position.
///
/// Positions are cached; call [`LocationResolver::refresh`] after the
/// registry changes, or [`LocationResolver::observe`] for a single node.
pub struct LocationResolver {
    registry: Arc<dyn NodeRegistry>,
    home_key: Option<String>,
    located: BTreeMap<String, Location>,
}

impl LocationResolver {
    pub fn new(registry: Arc<dyn NodeRegistry>, home_key: Option<String>) -> Self {
        let mut resolver = Self {
            registry,
            home_key: home_key
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty()),
            located: BTreeMap::new(),
        };
        resolver.refresh();
        resolver
    }

    /// Rebuild the position cache. Returns the number of located nodes.
    pub fn refresh(&mut self) -> usize {
        self.located = self
            .registry
            .list()
            .iter()
            .filter_map(Location::from_node)
            .map(|loc| (loc.key.clone(), loc))
            .collect();
        self.located.len()
    }

    /// Update a single node in the cache.
    pub fn observe(&mut self, node: &NodeIdentity) {
        match Location::from_node(node) {
            Some(loc) => {
                self.located.insert(loc.key.clone(), loc);
            },
            None => {
                self.located.remove(&node.key);
            },
        }
    }

    /// The operator's own node, when configured and located.
    pub fn home(&self) -> Option<&Location> {
        let home = self.home_key.as_deref()?;
        self.located
            .get(home)
            .or_else(|| self.located.values().find(|loc| prefix_matches(&loc.key, home)))
    }

    /// Locate by exact key, falling back to a display-name match.
    ///
    /// Name matching compares cleaned names case-insensitively: equality
    /// first, then containment.
    pub fn locate(&self, key_or_name: &str) -> Option<Location> {
        let query = key_or_name.trim();
        if query.is_empty() {
            return None;
        }
        let lower = query.to_lowercase();
        if let Some(loc) = self.located.get(&lower) {
            return Some(loc.clone());
        }
        let wanted = clean_contact_name(query).to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        let cleaned = |loc: &Location| clean_contact_name(&loc.name).to_lowercase();
        self.located
            .values()
            .find(|loc| cleaned(loc) == wanted)
            .or_else(|| self.located.values().find(|loc| cleaned(loc).contains(&wanted)))
            .cloned()
    }

    /// Locate a path prefix using the [`PrefixPreference::NearHome`] rule.
    pub fn locate_prefix(&self, prefix: &str) -> Option<Location> {
        self.locate_prefix_with(prefix, PrefixPreference::NearHome)
    }

    pub fn locate_prefix_with(
        &self,
        prefix: &str,
        preference: PrefixPreference,
    ) -> Option<Location> {
        let prefix = prefix.trim().to_lowercase();
        let candidates: Vec<&Location> = self
            .located
            .values()
            .filter(|loc| prefix_matches(&loc.key, &prefix))
            .collect();

        let chosen = match candidates.as_slice() {
            [] => return None,
            [only] => *only,
            _ => match preference {
                PrefixPreference::NearHome => self.pick_near_home(&candidates),
                PrefixPreference::Repeater => first_repeater_or_first(&candidates),
            },
        };
        Some(chosen.clone())
    }

    /// Registry nodes (located or not) whose key shares `prefix`.
    pub fn registry_matches(&self, prefix: &str) -> Vec<NodeIdentity> {
        self.registry.matching_prefix(prefix)
    }

    fn pick_near_home<'a>(&self, candidates: &[&'a Location]) -> &'a Location {
        let Some(home) = self.home() else {
            return first_repeater_or_first(candidates);
        };
        if let Some(home_match) = candidates.iter().copied().find(|loc| loc.key == home.key) {
            return home_match;
        }
        candidates
            .iter()
            .copied()
            .min_by(|a, b| {
                a.coordinate
                    .squared_distance(&home.coordinate)
                    .total_cmp(&b.coordinate.squared_distance(&home.coordinate))
            })
            .unwrap_or(candidates[0])
    }

    pub fn located_count(&self) -> usize {
        self.located.len()
    }
}

fn first_repeater_or_first<'a>(candidates: &[&'a Location]) -> &'a Location {
    candidates
        .iter()
        .copied()
        .find(|loc| loc.node_class == NodeClass::Repeater)
        .unwrap_or(candidates[0])
}
