//! Heatmap and direct-link series taken together.

use std::sync::Arc;

use {
    meshtrace_persistence::{DocumentStore, Result},
    serde_json::{Map, Value},
};

use crate::history::{AppendOutcome, HistoryConfig, SnapshotHistory, SnapshotNode};

pub const HEATMAP: &str = "heatmap";
pub const DIRECT_LINKS: &str = "directlinks";

/// Nodes and series-specific payload for one snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotInput {
    pub nodes: Vec<SnapshotNode>,
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderReport {
    pub heatmap: AppendOutcome,
    pub direct_links: AppendOutcome,
}

/// Takes both snapshots on the periodic tick and, at most once per
/// `min_gap_ms`, after message activity.
pub struct SnapshotRecorder {
    heatmap: SnapshotHistory,
    direct_links: SnapshotHistory,
    min_gap_ms: u64,
    last_taken_ms: Option<u64>,
}

impl SnapshotRecorder {
    pub fn load(
        store: Arc<dyn DocumentStore>,
        config: HistoryConfig,
        min_gap_ms: u64,
        now_ms: u64,
    ) -> Self {
        Self {
            heatmap: SnapshotHistory::load(HEATMAP, store.clone(), config, now_ms),
            direct_links: SnapshotHistory::load(DIRECT_LINKS, store, config, now_ms),
            min_gap_ms,
            last_taken_ms: None,
        }
    }

    pub fn heatmap(&self) -> &SnapshotHistory {
        &self.heatmap
    }

    pub fn direct_links(&self) -> &SnapshotHistory {
        &self.direct_links
    }

    /// Whether an activity-triggered snapshot may be taken now.
    pub fn activity_due(&self, now_ms: u64) -> bool {
        self.last_taken_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.min_gap_ms)
    }

    /// Append to both series. Both are attempted even if the first write
    /// fails.
    pub fn record(
        &mut self,
        heatmap: SnapshotInput,
        direct_links: SnapshotInput,
        now_ms: u64,
    ) -> Result<RecorderReport> {
        self.last_taken_ms = Some(now_ms);
        let heatmap = self
            .heatmap
            .append_if_changed(heatmap.nodes, heatmap.extra, now_ms);
        let direct_links = self.direct_links.append_if_changed(
            direct_links.nodes,
            direct_links.extra,
            now_ms,
        );
        Ok(RecorderReport {
            heatmap: heatmap?,
            direct_links: direct_links?,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, meshtrace_persistence::InMemoryDocumentStore, serde_json::json};

    fn node(name: &str) -> SnapshotNode {
        SnapshotNode {
            name: name.into(),
            lat: 0.5,
            lon: 0.5,
            node_type: "repeater".into(),
            pubkey: String::new(),
            use_count: None,
            link_count: Some(2),
            last_seen: Some(7),
        }
    }

    #[test]
    fn activity_snapshots_respect_min_gap() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let mut recorder = SnapshotRecorder::load(store, HistoryConfig::default(), 30_000, 0);
        assert!(recorder.activity_due(1_000));
        let heatmap = SnapshotInput {
            nodes: vec![node("Peak")],
            extra: Map::new(),
        };
        recorder
            .record(heatmap, SnapshotInput::default(), 1_000)
            .unwrap();
        assert!(!recorder.activity_due(30_999));
        assert!(recorder.activity_due(31_000));
    }

    #[test]
    fn both_series_are_written() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let mut recorder =
            SnapshotRecorder::load(store.clone(), HistoryConfig::default(), 30_000, 0);
        let mut extra = Map::new();
        extra.insert("links".into(), json!([["Peak", "Valley"]]));
        let heatmap = SnapshotInput {
            nodes: vec![node("Peak")],
            extra: Map::new(),
        };
        let links = SnapshotInput {
            nodes: vec![node("Peak"), node("Valley")],
            extra,
        };
        let report = recorder.record(heatmap, links, 5).unwrap();
        assert_eq!(report.heatmap, AppendOutcome::Appended { total: 1 });
        assert_eq!(report.direct_links, AppendOutcome::Appended { total: 1 });

        let doc = store.get("directlinks_history").unwrap();
        assert_eq!(doc["snapshots"][0]["links"][0][1], "Valley");
        assert_eq!(doc["snapshots"][0]["nodes"][1]["link_count"], 2);
        assert!(store.get("heatmap_history").is_some());
    }
}
