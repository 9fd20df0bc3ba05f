//! The engine context: every cache, owned in one place.

#[cfg(feature = "metrics")]
use std::time::Instant;
use std::{collections::BTreeMap, sync::Arc};

use {
    meshtrace_common::time::SECOND_MS,
    meshtrace_config::MeshtraceConfig,
    meshtrace_correlation::{
        ContactUpdateEvent, DerivedSenderRecord, Emitted, RawEvent, ReceptionCorrelator, Resolvers,
        SensorEntry,
    },
    meshtrace_hops::{DirectLinkGraph, HopNodeTracker, PathTracer},
    meshtrace_identity::{IdentityResolver, LocationResolver, NodeRegistry},
    meshtrace_persistence::{Collection, DocumentStore, PersistenceStore, SaveReport},
    meshtrace_snapshots::{HistoryConfig, RecorderReport, SnapshotRecorder},
    serde_json::{Map, json},
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use meshtrace_metrics::{
    correlation as correlation_metrics, counter, events as event_metrics,
    export as export_metrics, gauge, histogram, hops as hop_metrics,
    identity as identity_metrics, labels, persistence as persistence_metrics,
    snapshots as snapshot_metrics,
};

use crate::{Error, Result, sink::ExportSink, summary};

/// Scheduled work driven by the host's timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Save every collection, dirty or not.
    Save,
    /// Append to both snapshot histories.
    Snapshot,
    /// Write the export documents.
    Export,
    /// Re-read the registry and rebuild the name and position caches.
    RefreshLocations,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub saved: Vec<(Collection, SaveReport)>,
    pub snapshot: Option<RecorderReport>,
    pub exported: Vec<&'static str>,
    pub located: Option<usize>,
}

/// What handling one event changed.
#[derive(Debug, Default)]
pub struct HandleOutcome {
    /// The record written, if any.
    pub record: Option<DerivedSenderRecord>,
    /// The reception joined an already open message.
    pub merged: bool,
    pub traced: bool,
    pub hops_observed: usize,
    pub links_recorded: usize,
    /// Collections written because enough mutations accumulated.
    pub saved: Vec<Collection>,
    /// Collections whose coalesced save failed; they stay dirty.
    pub save_failures: Vec<Collection>,
    pub snapshot: Option<RecorderReport>,
}

/// The telemetry engine.
///
/// One owned value mutated through `&mut self`: every event and tick runs to
/// completion before the next one. Time is always passed in as epoch millis.
pub struct MeshEngine {
    config: MeshtraceConfig,
    registry: Arc<dyn NodeRegistry>,
    identity: IdentityResolver,
    locations: LocationResolver,
    correlator: ReceptionCorrelator,
    hops: HopNodeTracker,
    links: DirectLinkGraph,
    tracer: PathTracer,
    store: PersistenceStore,
    last_messages: BTreeMap<String, u64>,
    /// Last message times not yet written to the registry.
    registry_pending: BTreeMap<String, u64>,
    snapshots: SnapshotRecorder,
    sink: Arc<dyn ExportSink>,
}

fn last_message_attrs(at_ms: u64) -> Map<String, serde_json::Value> {
    let mut attrs = Map::new();
    attrs.insert("last_message".into(), json!(at_ms));
    attrs
}

impl MeshEngine {
    /// Build the engine and restore persisted state. Unreadable state is
    /// logged and starts empty.
    pub fn open(
        config: &MeshtraceConfig,
        registry: Arc<dyn NodeRegistry>,
        documents: Arc<dyn DocumentStore>,
        sink: Arc<dyn ExportSink>,
        now_ms: u64,
    ) -> Self {
        let persistence = &config.persistence;
        let store = PersistenceStore::new(Arc::clone(&documents))
            .with_ttl_ms(persistence.ttl_ms())
            .with_cadence(Collection::LastMessages, persistence.last_messages_every)
            .with_cadence(Collection::SenderRecords, persistence.sender_records_every)
            .with_cadence(Collection::HopUsage, persistence.hop_usage_every)
            .with_cadence(Collection::DirectLinks, persistence.direct_links_every);

        let history = HistoryConfig {
            max_snapshots: config.snapshots.max_snapshots,
            ttl_ms: config.snapshots.ttl_ms(),
            interval_ms: config.snapshots.interval_secs * SECOND_MS,
        };
        let snapshots = SnapshotRecorder::load(
            documents,
            history,
            config.snapshots.min_gap_secs * SECOND_MS,
            now_ms,
        );

        let mut engine = Self {
            identity: IdentityResolver::new(
                Arc::clone(&registry),
                config.identity.rebuild_throttle_ms(),
            ),
            locations: LocationResolver::new(
                Arc::clone(&registry),
                config.identity.home_key.clone(),
            ),
            correlator: ReceptionCorrelator::new(config.correlation.window_ms()),
            hops: HopNodeTracker::new(config.hops.disambiguation_degrees),
            links: DirectLinkGraph::new(),
            tracer: PathTracer::new(
                config.hops.path_debounce_secs * SECOND_MS,
                config.hops.path_retention_secs * SECOND_MS,
            ),
            store,
            last_messages: BTreeMap::new(),
            registry_pending: BTreeMap::new(),
            snapshots,
            sink,
            registry,
            config: config.clone(),
        };
        engine.restore(now_ms);
        engine
    }

    fn restore(&mut self, now_ms: u64) {
        self.last_messages = self.store.load(Collection::LastMessages);
        self.registry_pending = self.last_messages.clone();
        let annotated = self.flush_registry().unwrap_or_else(|e| {
            warn!(error = %e, "could not restore last message times to registry");
            0
        });

        let records = self
            .correlator
            .restore(self.store.load::<SensorEntry>(Collection::SenderRecords));
        let hops = self.hops.restore(self.store.load(Collection::HopUsage));
        let links = self.links.restore(self.store.load(Collection::DirectLinks));
        let located = self.locations.refresh();
        let names = self.identity.rebuild(now_ms);
        info!(
            last_messages = self.last_messages.len(),
            annotated,
            records,
            hops,
            links,
            located,
            names,
            "engine state restored"
        );
    }

    pub fn config(&self) -> &MeshtraceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn NodeRegistry> {
        &self.registry
    }

    pub fn correlator(&self) -> &ReceptionCorrelator {
        &self.correlator
    }

    pub fn hops(&self) -> &HopNodeTracker {
        &self.hops
    }

    pub fn links(&self) -> &DirectLinkGraph {
        &self.links
    }

    pub fn tracer(&self) -> &PathTracer {
        &self.tracer
    }

    pub fn snapshots(&self) -> &SnapshotRecorder {
        &self.snapshots
    }

    pub fn last_messages(&self) -> &BTreeMap<String, u64> {
        &self.last_messages
    }

    pub fn sink(&self) -> &Arc<dyn ExportSink> {
        &self.sink
    }

    /// Whether `collection` has mutations not yet written.
    pub fn is_dirty(&self, collection: Collection) -> bool {
        self.store.is_dirty(collection)
    }

    /// Handle one decoded event.
    ///
    /// Only a contact update the registry rejects is an error. Failed
    /// coalesced saves are reported in the outcome and retried later.
    pub fn handle_event(&mut self, event: &RawEvent, now_ms: u64) -> Result<HandleOutcome> {
        #[cfg(feature = "metrics")]
        let started = Instant::now();

        let outcome = self.handle(event, now_ms)?;

        #[cfg(feature = "metrics")]
        {
            counter!(event_metrics::RECEIVED_TOTAL, labels::KIND => event.kind()).increment(1);
            histogram!(event_metrics::HANDLE_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            self.record_outcome_metrics(event, &outcome);
        }
        Ok(outcome)
    }

    fn handle(&mut self, event: &RawEvent, now_ms: u64) -> Result<HandleOutcome> {
        let emitted = match event {
            RawEvent::ContactUpdate(update) => self.apply_contact(update, now_ms)?,
            other => {
                let mut resolvers = Resolvers {
                    identity: &mut self.identity,
                    locations: &self.locations,
                };
                match other {
                    RawEvent::Reception(e) => self.correlator.on_reception(e, &mut resolvers, now_ms),
                    RawEvent::DirectMessage(e) => {
                        self.correlator.on_direct_message(e, &mut resolvers, now_ms)
                    },
                    RawEvent::ChannelMessage(e) => {
                        self.correlator.on_channel_message(e, &mut resolvers, now_ms)
                    },
                    RawEvent::Advertisement(e) => {
                        self.correlator.on_advertisement(e, &mut resolvers, now_ms)
                    },
                    RawEvent::ContactUpdate(_) => None,
                }
            },
        };

        let Some(Emitted { record, merged }) = emitted else {
            debug!(kind = event.kind(), "event produced no record");
            return Ok(HandleOutcome::default());
        };

        let mut outcome = HandleOutcome {
            merged,
            ..HandleOutcome::default()
        };
        self.note(Collection::SenderRecords, &mut outcome, now_ms);

        if record.data_source.is_message() {
            self.track_last_message(&record, &mut outcome, now_ms);
            self.trace_path(&record, &mut outcome, now_ms);
            if self.snapshots.activity_due(now_ms) {
                match self.take_snapshots(now_ms) {
                    Ok(report) => outcome.snapshot = Some(report),
                    Err(e) => warn!(error = %e, "activity snapshot failed"),
                }
            }
        }
        outcome.record = Some(record);
        Ok(outcome)
    }

    fn apply_contact(
        &mut self,
        update: &ContactUpdateEvent,
        now_ms: u64,
    ) -> Result<Option<Emitted>> {
        let node = self.registry.upsert(&update.key, update.attributes.clone())?;
        self.identity.observe_contact(&node);
        self.locations.observe(&node);
        debug!(key = %node.key, name = %node.name, located = node.coordinate.is_some(), "contact updated");

        let mut resolvers = Resolvers {
            identity: &mut self.identity,
            locations: &self.locations,
        };
        Ok(self.correlator.on_contact_signal(
            &node.key,
            update.name().as_deref(),
            update.last_snr(),
            update.last_rssi(),
            &mut resolvers,
            now_ms,
        ))
    }

    fn track_last_message(
        &mut self,
        record: &DerivedSenderRecord,
        outcome: &mut HandleOutcome,
        now_ms: u64,
    ) {
        let (Some(key), Some(at_ms)) = (record.canonical_key.as_deref(), record.last_message_at_ms)
        else {
            return;
        };
        self.last_messages.insert(key.to_string(), at_ms);
        self.registry_pending.insert(key.to_string(), at_ms);
        self.note(Collection::LastMessages, outcome, now_ms);
    }

    /// Write buffered last message times for known nodes in one batch.
    /// Unknown keys are dropped; a failed batch stays buffered.
    fn flush_registry(&mut self) -> Result<usize> {
        let pending = std::mem::take(&mut self.registry_pending);
        let updates: Vec<_> = pending
            .iter()
            .filter(|(key, _)| self.registry.get(key).is_some())
            .map(|(key, at_ms)| (key.clone(), last_message_attrs(*at_ms)))
            .collect();
        if updates.is_empty() {
            return Ok(0);
        }
        match self.registry.upsert_many(updates) {
            Ok(updated) => {
                debug!(updated, "last message times written to registry");
                Ok(updated)
            },
            Err(e) => {
                self.registry_pending = pending;
                Err(e.into())
            },
        }
    }

    /// Trace the record's longest path once per message, and again when a
    /// longer copy of the same message arrives.
    ///
    /// A message is identified by sender and first reception time. Relays and
    /// links already counted for it are not counted again.
    fn trace_path(&mut self, record: &DerivedSenderRecord, outcome: &mut HandleOutcome, now_ms: u64) {
        if record.path_nodes.is_empty() || record.max_hops == 0 {
            return;
        }
        let heard_at = record
            .receptions
            .iter()
            .map(|r| r.observed_at_ms)
            .min()
            .unwrap_or(record.last_seen_ms);
        let Some(admission) = self.tracer.admit(
            &record.sender_name,
            heard_at,
            &record.path_nodes,
            record.max_hops,
            now_ms,
        ) else {
            return;
        };

        outcome.hops_observed = self.hops.observe_path(&admission.relays, &self.locations, now_ms);
        if outcome.hops_observed > 0 {
            self.note(Collection::HopUsage, outcome, now_ms);
        }
        outcome.links_recorded = self.links.record_links(&admission.links, now_ms);
        if outcome.links_recorded > 0 {
            self.note(Collection::DirectLinks, outcome, now_ms);
        }
        let last_message_at = record.last_message_at_ms.unwrap_or(record.last_seen_ms);
        outcome.traced = self
            .tracer
            .trace(
                &record.sender_name,
                &record.path_nodes,
                &self.locations,
                last_message_at,
                now_ms,
            )
            .is_some();
        info!(
            sender = %record.sender_name,
            path = %record.longest_path_label(),
            hops = outcome.hops_observed,
            links = outcome.links_recorded,
            traced = outcome.traced,
            "path observed"
        );
    }

    /// Count a mutation and save the collection when its cadence is reached.
    fn note(&mut self, collection: Collection, outcome: &mut HandleOutcome, now_ms: u64) {
        if !self.store.note_mutation(collection) {
            return;
        }
        match self.save_collection(collection, now_ms) {
            Ok(_) => outcome.saved.push(collection),
            Err(_) => outcome.save_failures.push(collection),
        }
    }

    fn save_collection(&mut self, collection: Collection, now_ms: u64) -> Result<SaveReport> {
        let result = match collection {
            Collection::LastMessages => {
                self.store
                    .save(collection, &mut self.last_messages, now_ms)
            },
            Collection::SenderRecords => {
                self.store
                    .save(collection, self.correlator.records_mut(), now_ms)
            },
            Collection::HopUsage => self.store.save(collection, self.hops.nodes_mut(), now_ms),
            Collection::DirectLinks => self.store.save(collection, self.links.links_mut(), now_ms),
        };

        #[cfg(feature = "metrics")]
        {
            match &result {
                Ok(report) => {
                    counter!(persistence_metrics::SAVES_TOTAL, labels::COLLECTION => collection.field())
                        .increment(1);
                    counter!(persistence_metrics::PRUNED_ENTRIES_TOTAL).increment(report.pruned as u64);
                },
                Err(_) => {
                    counter!(persistence_metrics::SAVE_FAILURES_TOTAL, labels::COLLECTION => collection.field())
                        .increment(1);
                },
            }
        }
        result.map_err(Error::from)
    }

    /// Save every collection and flush buffered registry writes. All are
    /// attempted; the first failure is returned and the failed collections
    /// stay dirty.
    pub fn save_all(&mut self, now_ms: u64) -> Result<Vec<(Collection, SaveReport)>> {
        let mut saved = Vec::with_capacity(Collection::ALL.len());
        let mut first_error = None;
        if let Err(e) = self.flush_registry() {
            warn!(error = %e, "failed to write last message times to registry");
            first_error = Some(e);
        }
        for collection in Collection::ALL {
            match self.save_collection(collection, now_ms) {
                Ok(report) => saved.push((collection, report)),
                Err(e) => {
                    first_error.get_or_insert(e);
                },
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }

    pub fn take_snapshots(&mut self, now_ms: u64) -> Result<RecorderReport> {
        let heatmap = summary::heatmap_snapshot(&self.hops, &self.tracer);
        let direct_links = summary::direct_links_snapshot(&self.links, &self.locations);
        let report = self.snapshots.record(heatmap, direct_links, now_ms)?;

        #[cfg(feature = "metrics")]
        {
            use meshtrace_snapshots::AppendOutcome;

            for (history, appended) in [
                (meshtrace_snapshots::HEATMAP, report.heatmap),
                (meshtrace_snapshots::DIRECT_LINKS, report.direct_links),
            ] {
                let name = match appended {
                    AppendOutcome::Appended { .. } => snapshot_metrics::APPENDED_TOTAL,
                    AppendOutcome::Unchanged | AppendOutcome::Empty => {
                        snapshot_metrics::SKIPPED_TOTAL
                    },
                };
                counter!(name, labels::HISTORY => history).increment(1);
            }
        }
        Ok(report)
    }

    /// Write every export document. A failed write is logged and the
    /// remaining exports are still attempted. Returns the exports written.
    pub fn export(&self, now_ms: u64) -> Vec<&'static str> {
        let thresholds = &self.config.export;
        let markers = self.hops.render();
        let documents = [
            (
                summary::HEATMAP,
                summary::heatmap(&markers, &self.tracer, thresholds.heatmap_threshold_ms(), now_ms),
            ),
            (
                summary::DIRECT_LINKS,
                summary::direct_links(
                    &self.links,
                    &self.locations,
                    thresholds.heatmap_threshold_ms(),
                    now_ms,
                ),
            ),
            (
                summary::NODEMAP,
                summary::nodemap(&self.registry.list(), thresholds.nodemap_threshold_ms(), now_ms),
            ),
            (
                summary::HOP_ENTITIES,
                summary::hop_entities(&markers, thresholds.entity_threshold_ms(), now_ms),
            ),
            (
                summary::PATH_ENTITIES,
                summary::path_entities(&self.tracer, thresholds.entity_threshold_ms(), now_ms),
            ),
        ];

        let mut written = Vec::with_capacity(documents.len());
        for (name, document) in documents {
            match self.sink.write_json(name, &document) {
                Ok(()) => {
                    written.push(name);
                    #[cfg(feature = "metrics")]
                    counter!(export_metrics::WRITES_TOTAL, labels::EXPORT => name).increment(1);
                },
                Err(e) => {
                    error!(export = name, error = %e, "export failed");
                    #[cfg(feature = "metrics")]
                    counter!(export_metrics::FAILURES_TOTAL, labels::EXPORT => name).increment(1);
                },
            }
        }
        info!(written = written.len(), markers = markers.len(), "exports written");
        written
    }

    /// Re-read the registry and rebuild the caches that depend on it.
    pub fn refresh_locations(&mut self, now_ms: u64) -> usize {
        if let Err(e) = self.registry.reload() {
            warn!(error = %e, "registry reload failed, keeping cached nodes");
        }
        let located = self.locations.refresh();
        let names = self.identity.rebuild(now_ms);
        debug!(located, names, "location cache refreshed");

        #[cfg(feature = "metrics")]
        counter!(identity_metrics::CACHE_REBUILDS_TOTAL).absolute(self.identity.rebuilds());
        located
    }

    pub fn on_tick(&mut self, tick: Tick, now_ms: u64) -> Result<TickReport> {
        let mut report = TickReport::default();
        match tick {
            Tick::Save => report.saved = self.save_all(now_ms)?,
            Tick::Snapshot => report.snapshot = Some(self.take_snapshots(now_ms)?),
            Tick::Export => report.exported = self.export(now_ms),
            Tick::RefreshLocations => report.located = Some(self.refresh_locations(now_ms)),
        }
        Ok(report)
    }

    #[cfg(feature = "metrics")]
    fn record_outcome_metrics(&self, event: &RawEvent, outcome: &HandleOutcome) {
        let Some(record) = &outcome.record else {
            return;
        };
        counter!(correlation_metrics::RECORDS_EMITTED_TOTAL).increment(1);
        if matches!(event, RawEvent::Reception(_)) {
            counter!(correlation_metrics::RECEPTIONS_TOTAL).increment(1);
            if outcome.merged {
                counter!(correlation_metrics::CORRELATED_RECEPTIONS_TOTAL).increment(1);
            }
        }
        if record.data_source.is_message() && record.canonical_key.is_none() {
            counter!(identity_metrics::UNRESOLVED_TOTAL).increment(1);
        }
        gauge!(correlation_metrics::OPEN_ENTRIES).set(self.correlator.open_entries() as f64);
        if outcome.hops_observed > 0 {
            counter!(hop_metrics::OBSERVATIONS_TOTAL).increment(outcome.hops_observed as u64);
            gauge!(hop_metrics::TRACKED_NODES).set(self.hops.len() as f64);
            gauge!(hop_metrics::LINKED_NODES).set(self.links.links().len() as f64);
        }
        if outcome.traced {
            counter!(hop_metrics::PATHS_TRACED_TOTAL).increment(1);
        }
    }
}
