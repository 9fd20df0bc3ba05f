//! Named, TTL-pruned collections on top of a [`DocumentStore`].

use std::{collections::BTreeMap, sync::Arc};

use {
    meshtrace_common::time::{DAY_MS, format_rfc3339},
    serde::{Serialize, de::DeserializeOwned},
    serde_json::{Map, Value, json},
    tracing::{debug, error, info, warn},
};

use crate::{
    Error, Result,
    coalesce::WriteCoalescer,
    expire::{Expire, prune_map},
    store::DocumentStore,
};

/// The persisted collections of derived state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    /// Canonical key → last message time.
    LastMessages,
    /// Record key → `{state, attributes}`.
    SenderRecords,
    /// Relay key → usage statistics.
    HopUsage,
    /// Node → node → `{last_seen, count}`.
    DirectLinks,
}

impl Collection {
    pub const ALL: [Self; 4] = [
        Self::LastMessages,
        Self::SenderRecords,
        Self::HopUsage,
        Self::DirectLinks,
    ];

    /// Document name in the store.
    pub fn document_name(self) -> &'static str {
        match self {
            Self::LastMessages => "last_messages",
            Self::SenderRecords => "hops_sensors",
            Self::HopUsage => "hop_nodes",
            Self::DirectLinks => "direct_links",
        }
    }

    /// Field holding the map inside the document.
    pub fn field(self) -> &'static str {
        match self {
            Self::LastMessages => "last_messages",
            Self::SenderRecords => "sensors",
            Self::HopUsage => "hop_nodes_used",
            Self::DirectLinks => "direct_links",
        }
    }

    /// Mutations between coalesced saves unless configured otherwise.
    pub fn default_every(self) -> u32 {
        match self {
            Self::LastMessages | Self::SenderRecords => 5,
            Self::HopUsage => 10,
            Self::DirectLinks => 20,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::LastMessages => 0,
            Self::SenderRecords => 1,
            Self::HopUsage => 2,
            Self::DirectLinks => 3,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.field())
    }
}

/// Outcome of a successful save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub kept: usize,
    pub pruned: usize,
}

/// Loads and saves collections, pruning expired entries on every save and
/// tracking when a mutation-triggered save is due.
pub struct PersistenceStore {
    store: Arc<dyn DocumentStore>,
    ttl_ms: u64,
    coalescers: [WriteCoalescer; 4],
}

impl PersistenceStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            ttl_ms: 7 * DAY_MS,
            coalescers: Collection::ALL.map(|c| WriteCoalescer::new(c.default_every())),
        }
    }

    #[must_use]
    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    #[must_use]
    pub fn with_cadence(mut self, collection: Collection, every: u32) -> Self {
        self.coalescers[collection.index()] = WriteCoalescer::new(every);
        self
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// The underlying document store, shared with other persisted state.
    pub fn documents(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    /// Load a collection. Missing or unreadable documents yield an empty map;
    /// individual entries that fail to decode are skipped.
    pub fn load<V: DeserializeOwned>(&self, collection: Collection) -> BTreeMap<String, V> {
        match self.try_load(collection) {
            Ok(map) => {
                info!(collection = %collection, entries = map.len(), "collection loaded");
                map
            },
            Err(e) => {
                warn!(collection = %collection, error = %e, "failed to load collection, starting empty");
                BTreeMap::new()
            },
        }
    }

    fn try_load<V: DeserializeOwned>(&self, collection: Collection) -> Result<BTreeMap<String, V>> {
        let name = collection.document_name();
        let Some(document) = self.store.load(name)? else {
            return Ok(BTreeMap::new());
        };
        let entries = match document.get(collection.field()) {
            Some(Value::Object(entries)) => entries,
            Some(_) => return Err(Error::malformed(name, format!("{} is not an object", collection.field()))),
            None => return Err(Error::malformed(name, format!("missing {}", collection.field()))),
        };

        let mut map = BTreeMap::new();
        for (key, value) in entries {
            match serde_json::from_value(value.clone()) {
                Ok(entry) => {
                    map.insert(key.clone(), entry);
                },
                Err(e) => debug!(collection = %collection, key, error = %e, "skipping undecodable entry"),
            }
        }
        Ok(map)
    }

    /// Prune `map` in place and write it out.
    ///
    /// Pruning happens even when the write fails, so the in-memory state
    /// stays bounded; the caller keeps the map and retries on the next save.
    pub fn save<V: Serialize + Expire>(
        &mut self,
        collection: Collection,
        map: &mut BTreeMap<String, V>,
        now_ms: u64,
    ) -> Result<SaveReport> {
        let cutoff = now_ms.saturating_sub(self.ttl_ms);
        let pruned = prune_map(map, cutoff);
        if pruned > 0 {
            debug!(collection = %collection, pruned, "pruned expired entries");
        }

        let mut entries = Map::new();
        for (key, value) in map.iter() {
            entries.insert(key.clone(), serde_json::to_value(value)?);
        }
        let mut document = Map::new();
        document.insert(collection.field().to_string(), Value::Object(entries));
        document.insert("count".into(), json!(map.len()));
        document.insert("saved_at".into(), json!(now_ms));
        document.insert("saved_at_formatted".into(), json!(format_rfc3339(now_ms)));
        let document = Value::Object(document);

        if let Err(e) = self.store.save(collection.document_name(), &document) {
            error!(collection = %collection, error = %e, "failed to save collection");
            return Err(e);
        }
        self.coalescers[collection.index()].mark_saved();
        info!(collection = %collection, kept = map.len(), pruned, "collection saved");
        Ok(SaveReport {
            kept: map.len(),
            pruned,
        })
    }

    /// Record a mutation of `collection`. Returns `true` when it should be
    /// saved now.
    pub fn note_mutation(&mut self, collection: Collection) -> bool {
        self.coalescers[collection.index()].note_mutation()
    }

    /// Whether `collection` has unsaved mutations.
    pub fn is_dirty(&self, collection: Collection) -> bool {
        self.coalescers[collection.index()].is_dirty()
    }
}
