//! Metric name and label definitions.
//!
//! Every metric the engine emits is named here so the set stays documented
//! in one place.

/// Inbound event metrics
pub mod events {
    /// Events decoded at the boundary, labelled by `kind`
    pub const RECEIVED_TOTAL: &str = "meshtrace_events_received_total";
    /// Input lines that did not decode into an event
    pub const SKIPPED_TOTAL: &str = "meshtrace_events_skipped_total";
    /// Time spent handling one event, in seconds
    pub const HANDLE_DURATION_SECONDS: &str = "meshtrace_event_handle_duration_seconds";
}

/// Reception correlation metrics
pub mod correlation {
    /// Receptions accepted into the correlation window
    pub const RECEPTIONS_TOTAL: &str = "meshtrace_receptions_total";
    /// Receptions merged into an already open message entry
    pub const CORRELATED_RECEPTIONS_TOTAL: &str = "meshtrace_correlated_receptions_total";
    /// Message entries currently inside the window
    pub const OPEN_ENTRIES: &str = "meshtrace_correlation_open_entries";
    /// Derived sender records written or overwritten
    pub const RECORDS_EMITTED_TOTAL: &str = "meshtrace_sender_records_emitted_total";
}

/// Identity resolution metrics
pub mod identity {
    /// Sender names that fell back to a pseudo-key
    pub const UNRESOLVED_TOTAL: &str = "meshtrace_identity_unresolved_total";
    /// Name-cache rebuilds triggered by misses
    pub const CACHE_REBUILDS_TOTAL: &str = "meshtrace_identity_cache_rebuilds_total";
}

/// Hop and link metrics
pub mod hops {
    /// Path nodes observed
    pub const OBSERVATIONS_TOTAL: &str = "meshtrace_hop_observations_total";
    /// Distinct relay nodes tracked
    pub const TRACKED_NODES: &str = "meshtrace_hop_tracked_nodes";
    /// Paths traced after debounce
    pub const PATHS_TRACED_TOTAL: &str = "meshtrace_paths_traced_total";
    /// Nodes with at least one direct link
    pub const LINKED_NODES: &str = "meshtrace_direct_link_nodes";
}

/// Persistence metrics
pub mod persistence {
    /// Collection saves, labelled by `collection`
    pub const SAVES_TOTAL: &str = "meshtrace_persistence_saves_total";
    /// Failed collection saves, labelled by `collection`
    pub const SAVE_FAILURES_TOTAL: &str = "meshtrace_persistence_save_failures_total";
    /// Entries dropped by TTL pruning
    pub const PRUNED_ENTRIES_TOTAL: &str = "meshtrace_persistence_pruned_entries_total";
}

/// Snapshot history metrics
pub mod snapshots {
    /// Snapshots appended, labelled by `history`
    pub const APPENDED_TOTAL: &str = "meshtrace_snapshots_appended_total";
    /// Snapshots skipped because nothing changed, labelled by `history`
    pub const SKIPPED_TOTAL: &str = "meshtrace_snapshots_skipped_total";
}

/// Export sink metrics
pub mod export {
    /// Export documents written, labelled by `export`
    pub const WRITES_TOTAL: &str = "meshtrace_export_writes_total";
    /// Export documents that failed to write
    pub const FAILURES_TOTAL: &str = "meshtrace_export_failures_total";
}

/// Common label keys
pub mod labels {
    pub const KIND: &str = "kind";
    pub const COLLECTION: &str = "collection";
    pub const HISTORY: &str = "history";
    pub const EXPORT: &str = "export";
}

/// Histogram bucket definitions
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Event handling duration buckets (in seconds)
    /// Covers 10µs to 1s; saves and snapshots dominate the tail
    pub static HANDLE_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
        ]
    });
}
