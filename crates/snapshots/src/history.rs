//! One snapshot series backed by a document.

use std::sync::Arc;

use {
    meshtrace_common::time::{DAY_MS, MINUTE_MS, format_rfc3339, is_older_than},
    meshtrace_persistence::{DocumentStore, Result},
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value, json},
    tracing::{debug, info, warn},
};

/// Nodes compared when deciding whether anything changed.
const SIGNATURE_HEAD: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub node_type: String,
    #[serde(default)]
    pub pubkey: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<u64>,
}

impl SnapshotNode {
    /// Use count for relays, link count for linked nodes.
    pub fn usage(&self) -> u64 {
        self.use_count.or(self.link_count).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
    pub nodes: Vec<SnapshotNode>,
    /// Series-specific payload such as `links` or `paths`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, PartialEq)]
struct Signature {
    count: usize,
    head: Vec<(String, u64)>,
}

fn signature(nodes: &[SnapshotNode]) -> Signature {
    Signature {
        count: nodes.len(),
        head: nodes
            .iter()
            .take(SIGNATURE_HEAD)
            .map(|n| (n.name.clone(), n.usage()))
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    pub max_snapshots: usize,
    pub ttl_ms: u64,
    pub interval_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 288,
            ttl_ms: DAY_MS,
            interval_ms: 5 * MINUTE_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended { total: usize },
    Unchanged,
    Empty,
}

/// Append-only series. Identical consecutive snapshots are stored once and
/// only the newest `max_snapshots` are kept.
pub struct SnapshotHistory {
    name: String,
    store: Arc<dyn DocumentStore>,
    config: HistoryConfig,
    snapshots: Vec<Snapshot>,
}

impl SnapshotHistory {
    /// Load the series `name`, dropping snapshots older than the TTL.
    /// An unreadable document starts an empty series.
    pub fn load(
        name: impl Into<String>,
        store: Arc<dyn DocumentStore>,
        config: HistoryConfig,
        now_ms: u64,
    ) -> Self {
        let name = name.into();
        let snapshots = match store.load(&document_name(&name)) {
            Ok(Some(document)) => decode_snapshots(&name, &document),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(history = %name, error = %e, "failed to load snapshot history");
                Vec::new()
            },
        };
        let loaded = snapshots.len();
        let mut history = Self {
            name,
            store,
            config,
            snapshots,
        };
        history.expire(now_ms);
        history.truncate();
        info!(
            history = %history.name,
            kept = history.snapshots.len(),
            expired = loaded - history.snapshots.len(),
            "snapshot history loaded"
        );
        history
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Append `nodes` unless the list is empty or matches the latest
    /// snapshot's signature, then drop expired snapshots and persist the
    /// series.
    ///
    /// On a failed write the snapshot stays in memory and is written with
    /// the next successful save.
    pub fn append_if_changed(
        &mut self,
        nodes: Vec<SnapshotNode>,
        extra: Map<String, Value>,
        now_ms: u64,
    ) -> Result<AppendOutcome> {
        if nodes.is_empty() {
            debug!(history = %self.name, "no nodes, snapshot skipped");
            return Ok(AppendOutcome::Empty);
        }
        if self
            .latest()
            .is_some_and(|latest| signature(&latest.nodes) == signature(&nodes))
        {
            debug!(history = %self.name, total = self.snapshots.len(), "unchanged, snapshot skipped");
            return Ok(AppendOutcome::Unchanged);
        }

        let node_count = nodes.len();
        self.snapshots.push(Snapshot {
            timestamp_ms: now_ms,
            nodes,
            extra,
        });
        self.expire(now_ms);
        self.truncate();
        self.save(now_ms)?;
        info!(
            history = %self.name,
            total = self.snapshots.len(),
            nodes = node_count,
            "snapshot appended"
        );
        Ok(AppendOutcome::Appended {
            total: self.snapshots.len(),
        })
    }

    pub fn save(&self, now_ms: u64) -> Result<()> {
        let document = json!({
            "snapshots": self.snapshots,
            "count": self.snapshots.len(),
            "max_snapshots": self.config.max_snapshots,
            "snapshot_interval_minutes": self.config.interval_ms / MINUTE_MS,
            "last_updated": format_rfc3339(now_ms),
            "version": now_ms / 1_000,
        });
        self.store.save(&document_name(&self.name), &document)
    }

    fn expire(&mut self, now_ms: u64) {
        let ttl_ms = self.config.ttl_ms;
        self.snapshots
            .retain(|s| !is_older_than(s.timestamp_ms, now_ms, ttl_ms));
    }

    fn truncate(&mut self) {
        let excess = self.snapshots.len().saturating_sub(self.config.max_snapshots);
        if excess > 0 {
            self.snapshots.drain(..excess);
        }
    }
}

fn document_name(name: &str) -> String {
    format!("{name}_history")
}

fn decode_snapshots(name: &str, document: &Value) -> Vec<Snapshot> {
    let Some(items) = document.get("snapshots").and_then(Value::as_array) else {
        warn!(history = %name, "history document has no snapshots array");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!(history = %name, error = %e, "skipping undecodable snapshot");
                None
            },
        })
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        meshtrace_common::time::HOUR_MS,
        meshtrace_persistence::{FileDocumentStore, InMemoryDocumentStore},
        tempfile::TempDir,
    };

    const NOW: u64 = 10 * DAY_MS;

    fn node(name: &str, use_count: u64) -> SnapshotNode {
        SnapshotNode {
            name: name.to_string(),
            lat: 1.0,
            lon: 2.0,
            node_type: "repeater".into(),
            pubkey: "aa".into(),
            use_count: Some(use_count),
            link_count: None,
            last_seen: None,
        }
    }

    fn history(store: Arc<InMemoryDocumentStore>, config: HistoryConfig) -> SnapshotHistory {
        SnapshotHistory::load("heatmap", store, config, NOW)
    }

    #[test]
    fn identical_lists_are_stored_once() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let mut history = history(store.clone(), HistoryConfig::default());

        let nodes = vec![node("Peak", 3), node("Valley", 1)];
        assert_eq!(
            history.append_if_changed(nodes.clone(), Map::new(), NOW).unwrap(),
            AppendOutcome::Appended { total: 1 }
        );
        assert_eq!(
            history.append_if_changed(nodes, Map::new(), NOW + 1).unwrap(),
            AppendOutcome::Unchanged
        );
        assert_eq!(history.len(), 1);
        assert_eq!(store.save_count(), 1);

        let changed = vec![node("Peak", 4), node("Valley", 1)];
        assert!(matches!(
            history.append_if_changed(changed, Map::new(), NOW + 2).unwrap(),
            AppendOutcome::Appended { total: 2 }
        ));
    }

    #[test]
    fn empty_lists_are_skipped() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let mut history = history(store, HistoryConfig::default());
        assert_eq!(
            history.append_if_changed(Vec::new(), Map::new(), NOW).unwrap(),
            AppendOutcome::Empty
        );
        assert!(history.is_empty());
    }

    #[test]
    fn cap_keeps_newest() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let config = HistoryConfig {
            max_snapshots: 3,
            ..HistoryConfig::default()
        };
        let mut history = history(store.clone(), config);
        for i in 0..5 {
            history
                .append_if_changed(vec![node("Peak", i)], Map::new(), NOW + i)
                .unwrap();
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.snapshots()[0].timestamp_ms, NOW + 2);

        let doc = store.get("heatmap_history").unwrap();
        assert_eq!(doc["count"], 3);
        assert_eq!(doc["max_snapshots"], 3);
        assert_eq!(doc["snapshot_interval_minutes"], 5);
    }

    #[test]
    fn appending_drops_snapshots_past_ttl() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let mut history = history(store.clone(), HistoryConfig::default());
        history
            .append_if_changed(vec![node("Peak", 1)], Map::new(), NOW)
            .unwrap();
        assert_eq!(
            history
                .append_if_changed(vec![node("Peak", 2)], Map::new(), NOW + 30 * HOUR_MS)
                .unwrap(),
            AppendOutcome::Appended { total: 1 }
        );
        assert_eq!(history.snapshots()[0].timestamp_ms, NOW + 30 * HOUR_MS);
        assert_eq!(store.get("heatmap_history").unwrap()["count"], 1);
    }

    #[test]
    fn reload_drops_snapshots_past_ttl() {
        let tmp = TempDir::new().unwrap();
        let store: Arc<dyn DocumentStore> = Arc::new(FileDocumentStore::new(tmp.path()));
        let mut extra = Map::new();
        extra.insert("paths".into(), json!([]));
        {
            let mut history =
                SnapshotHistory::load("directlinks", store.clone(), HistoryConfig::default(), NOW);
            history
                .append_if_changed(vec![node("Old", 1)], extra.clone(), NOW - 25 * HOUR_MS)
                .unwrap();
            history
                .append_if_changed(vec![node("New", 1)], extra, NOW - HOUR_MS)
                .unwrap();
        }
        let reloaded = SnapshotHistory::load("directlinks", store, HistoryConfig::default(), NOW);
        assert_eq!(reloaded.len(), 1);
        let latest = reloaded.latest().unwrap();
        assert_eq!(latest.nodes[0].name, "New");
        assert_eq!(latest.extra["paths"], json!([]));
    }

    #[test]
    fn failed_writes_keep_the_snapshot() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.fail_saves(true);
        let mut history = history(store.clone(), HistoryConfig::default());
        assert!(
            history
                .append_if_changed(vec![node("Peak", 1)], Map::new(), NOW)
                .is_err()
        );
        assert_eq!(history.len(), 1);
        store.fail_saves(false);
        history.save(NOW).unwrap();
        assert_eq!(store.get("heatmap_history").unwrap()["count"], 1);
    }
}
