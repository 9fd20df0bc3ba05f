//! Direct-link graph.

use std::collections::BTreeMap;

use {
    meshtrace_persistence::Expire,
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStat {
    #[serde(rename = "last_seen")]
    pub last_seen_ms: u64,
    pub count: u64,
}

impl Expire for LinkStat {
    fn expire(&mut self, cutoff_ms: u64) -> bool {
        self.last_seen_ms < cutoff_ms
    }
}

/// Adjacency map of relays heard next to each other in a path.
///
/// Links are stored in both directions, keyed by lowercased prefix.
#[derive(Debug, Default)]
pub struct DirectLinkGraph {
    links: BTreeMap<String, BTreeMap<String, LinkStat>>,
}

impl DirectLinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(&mut self, links: BTreeMap<String, BTreeMap<String, LinkStat>>) -> usize {
        self.links = links;
        self.links.len()
    }

    pub fn links(&self) -> &BTreeMap<String, BTreeMap<String, LinkStat>> {
        &self.links
    }

    pub fn links_mut(&mut self) -> &mut BTreeMap<String, BTreeMap<String, LinkStat>> {
        &mut self.links
    }

    pub fn neighbours(&self, node: &str) -> Option<&BTreeMap<String, LinkStat>> {
        self.links.get(node)
    }

    /// Directed entries held (each link counts twice).
    pub fn edge_count(&self) -> usize {
        self.links.values().map(BTreeMap::len).sum()
    }

    /// Record every pair in `links`. Returns the number of links recorded;
    /// a node paired with itself is not a link.
    pub fn record_links(&mut self, links: &[(String, String)], now_ms: u64) -> usize {
        links
            .iter()
            .filter(|(a, b)| self.record(a, b, now_ms))
            .count()
    }

    /// Record one link in both directions.
    pub fn record(&mut self, a: &str, b: &str, now_ms: u64) -> bool {
        let a = a.trim().to_lowercase();
        let b = b.trim().to_lowercase();
        if a.is_empty() || b.is_empty() || a == b {
            return false;
        }
        self.bump(&a, &b, now_ms);
        self.bump(&b, &a, now_ms);
        true
    }

    fn bump(&mut self, from: &str, to: &str, now_ms: u64) {
        let stat = self
            .links
            .entry(from.to_string())
            .or_default()
            .entry(to.to_string())
            .or_insert(LinkStat {
                last_seen_ms: now_ms,
                count: 0,
            });
        stat.count += 1;
        stat.last_seen_ms = now_ms;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, meshtrace_persistence::prune_map};

    fn pairs(nodes: &[(&str, &str)]) -> Vec<(String, String)> {
        nodes
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn records_pairs_in_both_directions() {
        let mut graph = DirectLinkGraph::new();
        assert_eq!(
            graph.record_links(&pairs(&[("AA", "bb"), ("bb", "bb"), ("bb", "cc")]), 10),
            2
        );
        assert_eq!(graph.record_links(&pairs(&[("aa", "bb")]), 20), 1);

        let ab = graph.neighbours("aa").unwrap()["bb"];
        assert_eq!(ab, LinkStat { last_seen_ms: 20, count: 2 });
        assert_eq!(graph.neighbours("bb").unwrap()["aa"].count, 2);
        assert_eq!(graph.neighbours("cc").unwrap()["bb"].count, 1);
        assert!(!graph.neighbours("bb").unwrap().contains_key("bb"));
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn blank_links_record_nothing() {
        let mut graph = DirectLinkGraph::new();
        assert_eq!(graph.record_links(&pairs(&[("aa", " "), ("", "bb")]), 1), 0);
        assert_eq!(graph.record_links(&[], 1), 0);
        assert!(graph.links().is_empty());
    }

    #[test]
    fn stale_links_prune_and_empty_nodes_vanish() {
        let mut graph = DirectLinkGraph::new();
        graph.record("aa", "bb", 5);
        graph.record("aa", "cc", 50);
        let removed = prune_map(graph.links_mut(), 10);
        assert_eq!(removed, 1);
        assert!(graph.neighbours("bb").is_none());
        assert_eq!(graph.neighbours("aa").unwrap().len(), 1);

        let json = serde_json::to_value(graph.links()).unwrap();
        assert_eq!(json["aa"]["cc"]["last_seen"], 50);
    }
}
