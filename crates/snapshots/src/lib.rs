//! Capped, deduplicated snapshot series for playback.

pub mod history;
pub mod recorder;

pub use {
    history::{AppendOutcome, HistoryConfig, Snapshot, SnapshotHistory, SnapshotNode},
    recorder::{DIRECT_LINKS, HEATMAP, RecorderReport, SnapshotInput, SnapshotRecorder},
};
