/// Config schema types (correlation, identity, storage, persistence, hops,
/// snapshots, export, metrics).
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const SECOND_MS: u64 = 1_000;
const HOUR_MS: u64 = 3_600 * SECOND_MS;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshtraceConfig {
    pub correlation: CorrelationConfig,
    pub identity: IdentityConfig,
    pub registry: RegistryConfig,
    pub storage: StorageConfig,
    pub persistence: PersistenceConfig,
    pub hops: HopsConfig,
    pub snapshots: SnapshotsConfig,
    pub export: ExportConfig,
    pub metrics: MetricsConfig,
}

/// Reception correlation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// How long receptions of one message are merged. Defaults to 10 s.
    pub window_secs: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self { window_secs: 10 }
    }
}

impl CorrelationConfig {
    #[must_use]
    pub fn window_ms(&self) -> u64 {
        self.window_secs * SECOND_MS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Minimum gap between two name-cache rebuilds triggered by misses.
    pub rebuild_throttle_secs: u64,
    /// Key of the operator's own repeater. Used to break ties when a path
    /// prefix matches several registry nodes.
    pub home_key: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            rebuild_throttle_secs: 60,
            home_key: None,
        }
    }
}

impl IdentityConfig {
    #[must_use]
    pub fn rebuild_throttle_ms(&self) -> u64 {
        self.rebuild_throttle_secs * SECOND_MS
    }
}

/// Node registry backing file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// JSON contacts file. When unset the registry lives in memory only.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for persisted collections and snapshot histories.
    /// Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
}

/// TTL pruning and write coalescing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub ttl_days: u64,
    /// Periodic save cadence.
    pub save_interval_secs: u64,
    pub last_messages_every: u32,
    pub sender_records_every: u32,
    pub hop_usage_every: u32,
    pub direct_links_every: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            ttl_days: 7,
            save_interval_secs: 300,
            last_messages_every: 5,
            sender_records_every: 5,
            hop_usage_every: 10,
            direct_links_every: 20,
        }
    }
}

impl PersistenceConfig {
    #[must_use]
    pub fn ttl_ms(&self) -> u64 {
        self.ttl_days * 24 * HOUR_MS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HopsConfig {
    /// Two same-named nodes further apart than this (in degrees, per axis)
    /// are rendered as separate markers.
    pub disambiguation_degrees: f64,
    pub path_debounce_secs: u64,
    pub path_retention_secs: u64,
}

impl Default for HopsConfig {
    fn default() -> Self {
        Self {
            disambiguation_degrees: 0.001,
            path_debounce_secs: 60,
            path_retention_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotsConfig {
    pub max_snapshots: usize,
    pub interval_secs: u64,
    /// Minimum gap between activity-triggered snapshots.
    pub min_gap_secs: u64,
    pub ttl_hours: u64,
}

impl Default for SnapshotsConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 288,
            interval_secs: 300,
            min_gap_secs: 30,
            ttl_hours: 24,
        }
    }
}

impl SnapshotsConfig {
    #[must_use]
    pub fn ttl_ms(&self) -> u64 {
        self.ttl_hours * HOUR_MS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Output directory for JSON summaries. Defaults to `<data_dir>/export`.
    pub dir: Option<PathBuf>,
    pub interval_secs: u64,
    pub heatmap_threshold_hours: u64,
    pub nodemap_threshold_hours: u64,
    pub entity_threshold_hours: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: None,
            interval_secs: 300,
            heatmap_threshold_hours: 168,
            nodemap_threshold_hours: 12,
            entity_threshold_hours: 12,
        }
    }
}

impl ExportConfig {
    #[must_use]
    pub fn heatmap_threshold_ms(&self) -> u64 {
        self.heatmap_threshold_hours * HOUR_MS
    }

    #[must_use]
    pub fn nodemap_threshold_ms(&self) -> u64 {
        self.nodemap_threshold_hours * HOUR_MS
    }

    #[must_use]
    pub fn entity_threshold_ms(&self) -> u64 {
        self.entity_threshold_hours * HOUR_MS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Write Prometheus text next to the exports.
    #[serde(default)]
    pub prometheus_export: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prometheus_export: false,
        }
    }
}

fn default_true() -> bool {
    true
}

impl MeshtraceConfig {
    /// Directory holding persisted collections, falling back to the
    /// platform data dir and finally `./.meshtrace`.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .or_else(crate::loader::default_data_dir)
            .unwrap_or_else(|| PathBuf::from(".meshtrace"))
    }

    #[must_use]
    pub fn export_dir(&self) -> PathBuf {
        self.export
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("export"))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_sections_keep_defaults() {
        let cfg: MeshtraceConfig = toml::from_str(
            r#"
[persistence]
ttl_days = 3

[snapshots]
max_snapshots = 10
"#,
        )
        .unwrap();
        assert_eq!(cfg.persistence.ttl_days, 3);
        assert_eq!(cfg.persistence.hop_usage_every, 10);
        assert_eq!(cfg.snapshots.max_snapshots, 10);
        assert_eq!(cfg.snapshots.min_gap_secs, 30);
        assert_eq!(cfg.correlation.window_ms(), 10_000);
        assert!(cfg.metrics.enabled);
    }

    #[test]
    fn export_dir_defaults_under_data_dir() {
        let mut cfg = MeshtraceConfig::default();
        cfg.storage.data_dir = Some(PathBuf::from("/tmp/mesh"));
        assert_eq!(cfg.export_dir(), PathBuf::from("/tmp/mesh/export"));
    }
}
