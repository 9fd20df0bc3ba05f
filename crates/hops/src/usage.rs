//! Relay usage statistics and marker rendering.

use std::collections::BTreeMap;

use {
    meshtrace_common::{
        Coordinate, NodeClass,
        names::{normalize_display_name, sanitize_name, truncate_chars},
    },
    meshtrace_identity::LocationResolver,
    meshtrace_persistence::Expire,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

/// How much a relay has been used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopUsage {
    /// Registry key when the prefix resolved, otherwise the prefix itself.
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub node_class: NodeClass,
    #[serde(default)]
    pub coordinate: Option<Coordinate>,
    pub use_count: u64,
    #[serde(rename = "last_used")]
    pub last_used_ms: u64,
}

impl Expire for HopUsage {
    fn expire(&mut self, cutoff_ms: u64) -> bool {
        self.last_used_ms < cutoff_ms
    }
}

/// Display record for one located relay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopMarker {
    /// Sanitized name, with a key suffix when same-named relays sit apart.
    pub id: String,
    pub key: String,
    pub name: String,
    pub node_class: NodeClass,
    pub icon: &'static str,
    pub coordinate: Coordinate,
    pub use_count: u64,
    pub last_used_ms: u64,
}

/// Tracks relays seen in paths.
pub struct HopNodeTracker {
    nodes: BTreeMap<String, HopUsage>,
    tolerance_deg: f64,
}

impl HopNodeTracker {
    /// `tolerance_deg` is how far apart same-named relays may be before
    /// they get separate markers.
    pub fn new(tolerance_deg: f64) -> Self {
        Self {
            nodes: BTreeMap::new(),
            tolerance_deg,
        }
    }

    pub fn restore(&mut self, nodes: BTreeMap<String, HopUsage>) -> usize {
        self.nodes = nodes;
        self.nodes.len()
    }

    pub fn nodes(&self) -> &BTreeMap<String, HopUsage> {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut BTreeMap<String, HopUsage> {
        &mut self.nodes
    }

    pub fn get(&self, key: &str) -> Option<&HopUsage> {
        self.nodes.get(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Count one use of every node in `path_nodes`. A relay appearing twice
    /// is counted twice. Returns the number of observations made.
    pub fn observe_path(
        &mut self,
        path_nodes: &[String],
        locations: &LocationResolver,
        now_ms: u64,
    ) -> usize {
        let mut observed = 0;
        for prefix in path_nodes {
            let prefix = prefix.trim().to_lowercase();
            if prefix.is_empty() {
                continue;
            }
            let located = locations.locate_prefix(&prefix);
            let key = located
                .as_ref()
                .map_or_else(|| prefix.clone(), |loc| loc.key.clone());

            let usage = self.nodes.entry(key.clone()).or_insert_with(|| HopUsage {
                key,
                name: prefix.clone(),
                node_class: NodeClass::Unknown,
                coordinate: None,
                use_count: 0,
                last_used_ms: now_ms,
            });
            if let Some(loc) = located {
                usage.name = loc.name;
                usage.node_class = loc.node_class;
                usage.coordinate = Some(loc.coordinate);
            }
            usage.use_count += 1;
            usage.last_used_ms = now_ms;
            observed += 1;
            debug!(prefix = %prefix, key = %usage.key, uses = usage.use_count, "hop observed");
        }
        observed
    }

    /// Markers for every located relay, ordered by id.
    ///
    /// Relays are grouped by sanitized name. When any member of a group is
    /// further than the tolerance from the group's first member, every member
    /// gets a `<name>_<key[..6]>` id. Otherwise the group shows as one `<name>`
    /// marker for the most recently used member, the greater key on a tie.
    pub fn render(&self) -> Vec<HopMarker> {
        let mut groups: BTreeMap<String, Vec<(&HopUsage, Coordinate)>> = BTreeMap::new();
        for usage in self.nodes.values() {
            if let Some(coordinate) = usage.coordinate {
                groups
                    .entry(sanitize_name(&usage.name))
                    .or_default()
                    .push((usage, coordinate));
            }
        }

        let mut markers = BTreeMap::new();
        for (safe_name, members) in groups {
            let Some((_, first)) = members.first().copied() else {
                continue;
            };
            let disambiguate = members
                .iter()
                .skip(1)
                .any(|(_, c)| c.differs_from(&first, self.tolerance_deg));

            let shown = if disambiguate {
                members
            } else {
                members
                    .into_iter()
                    .max_by(|(a, _), (b, _)| {
                        a.last_used_ms
                            .cmp(&b.last_used_ms)
                            .then_with(|| a.key.cmp(&b.key))
                    })
                    .into_iter()
                    .collect()
            };
            for (usage, coordinate) in shown {
                let id = if disambiguate {
                    format!("{safe_name}_{}", truncate_chars(&usage.key, 6))
                } else {
                    safe_name.clone()
                };
                markers.insert(id.clone(), HopMarker {
                    id,
                    key: usage.key.clone(),
                    name: normalize_display_name(&usage.name),
                    node_class: usage.node_class,
                    icon: usage.node_class.icon(),
                    coordinate,
                    use_count: usage.use_count,
                    last_used_ms: usage.last_used_ms,
                });
            }
        }
        markers.into_values().collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        meshtrace_common::NodeIdentity,
        meshtrace_identity::InMemoryRegistry,
        std::sync::Arc,
    };

    fn usage(key: &str, name: &str, lat: f64, lon: f64) -> (String, HopUsage) {
        (key.to_string(), HopUsage {
            key: key.to_string(),
            name: name.to_string(),
            node_class: NodeClass::Repeater,
            coordinate: Some(Coordinate::new(lat, lon)),
            use_count: 1,
            last_used_ms: 0,
        })
    }

    fn tracker_with(nodes: impl IntoIterator<Item = (String, HopUsage)>) -> HopNodeTracker {
        let mut tracker = HopNodeTracker::new(0.001);
        tracker.restore(nodes.into_iter().collect());
        tracker
    }

    #[test]
    fn distant_namesakes_are_disambiguated() {
        let tracker = tracker_with([
            usage("aa1111aaaa", "Relay", 10.0, 20.0),
            usage("bb2222bbbb", "Relay", 10.01, 20.0),
        ]);
        let ids: Vec<_> = tracker.render().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["relay_aa1111", "relay_bb2222"]);
    }

    #[test]
    fn nearby_namesakes_share_one_marker() {
        let tracker = tracker_with([
            usage("aa1111aaaa", "Relay", 10.0, 20.0),
            usage("bb2222bbbb", "Relay", 10.0002, 20.0),
        ]);
        let markers = tracker.render();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].id, "relay");
        assert_eq!(markers[0].key, "bb2222bbbb");
    }

    #[test]
    fn shared_marker_shows_the_latest_used() {
        let (key, mut recent) = usage("aa1111aaaa", "Relay", 10.0, 20.0);
        recent.last_used_ms = 2_000;
        recent.use_count = 7;
        let (other_key, mut older) = usage("bb2222bbbb", "Relay", 10.0002, 20.0);
        older.last_used_ms = 1_000;
        let tracker = tracker_with([(key, recent), (other_key, older)]);

        let markers = tracker.render();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].key, "aa1111aaaa");
        assert_eq!(markers[0].use_count, 7);
        assert_eq!(markers[0].last_used_ms, 2_000);
    }

    #[test]
    fn render_is_idempotent_and_skips_unlocated() {
        let mut nodes: Vec<_> = vec![
            usage("aa1111aaaa", "Café Relay", 10.0, 20.0),
            usage("cc3333cccc", "Ridge", 11.0, 21.0),
        ];
        nodes.push(("dd".into(), HopUsage {
            key: "dd".into(),
            name: "dd".into(),
            node_class: NodeClass::Unknown,
            coordinate: None,
            use_count: 4,
            last_used_ms: 0,
        }));
        let tracker = tracker_with(nodes);
        let first = tracker.render();
        assert_eq!(first, tracker.render());
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].id, "cafe_relay");
        assert_eq!(first[0].name, "Cafe Relay");
        assert_eq!(first[0].icon, "mdi:radio-tower");
    }

    #[test]
    fn repeated_prefixes_count_per_occurrence() {
        let registry = Arc::new(InMemoryRegistry::with_nodes([
            NodeIdentity::new("aa0102030405", "North Relay")
                .with_class(NodeClass::Repeater)
                .at(1.0, 1.0),
            NodeIdentity::new("bb0102030405", "South Relay").at(2.0, 2.0),
        ]));
        let locations = LocationResolver::new(registry, None);
        let mut tracker = HopNodeTracker::new(0.001);
        let path: Vec<String> = ["aa", "bb", "aa"].map(String::from).to_vec();

        assert_eq!(tracker.observe_path(&path, &locations, 1_000), 3);
        assert_eq!(tracker.observe_path(&path, &locations, 2_000), 3);

        let north = tracker.get("aa0102030405").unwrap();
        assert_eq!(north.use_count, 4);
        assert_eq!(north.last_used_ms, 2_000);
        assert_eq!(tracker.get("bb0102030405").unwrap().use_count, 2);
    }

    #[test]
    fn unresolved_prefixes_are_kept_without_position() {
        let locations = LocationResolver::new(Arc::new(InMemoryRegistry::new()), None);
        let mut tracker = HopNodeTracker::new(0.001);
        tracker.observe_path(&["EE".to_string()], &locations, 5);
        let usage = tracker.get("ee").unwrap();
        assert!(usage.coordinate.is_none());
        assert!(tracker.render().is_empty());
    }

    #[test]
    fn expiry_uses_last_use() {
        let (_, mut hop) = usage("aa", "A", 0.0, 0.0);
        hop.last_used_ms = 100;
        assert!(hop.expire(101));
        assert!(!hop.expire(100));
    }
}
