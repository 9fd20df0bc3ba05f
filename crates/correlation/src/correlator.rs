//! The reception correlator.

use std::collections::BTreeMap;

use {
    meshtrace_common::{
        Coordinate,
        names::{sanitize_name, split_sender, strip_contact_suffix, truncate_chars},
    },
    meshtrace_identity::{IdentityResolver, LocationResolver},
    tracing::{debug, warn},
};

use crate::{
    event::{
        AdvertisementEvent, ChannelMessageEvent, DirectMessageEvent, ReceptionEvent,
    },
    reception::{Reception, best_reception, longest_path},
    record::{DataSource, DerivedSenderRecord, MessageType, SensorEntry},
    window::WindowedMap,
};

const MESSAGE_PREVIEW_CHARS: usize = 100;
/// Leading characters compared when matching a direct message to a reception.
const TEXT_MATCH_CHARS: usize = 20;

/// Lookups the correlator needs while handling one event.
pub struct Resolvers<'a> {
    pub identity: &'a mut IdentityResolver,
    pub locations: &'a LocationResolver,
}

/// Receptions of one message share channel, sender timestamp and sender name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub channel: Option<u32>,
    pub timestamp: Option<i64>,
    pub sender: String,
}

/// Receptions of one message gathered inside the window.
#[derive(Debug, Clone)]
pub struct MessageCacheEntry {
    pub sender_name: String,
    pub channel: Option<u32>,
    pub raw_text: String,
    pub message_text: String,
    pub message_timestamp: Option<i64>,
    pub receptions: Vec<Reception>,
    pub first_seen_ms: u64,
}

/// A record written by the correlator.
#[derive(Debug, Clone)]
pub struct Emitted {
    pub record: DerivedSenderRecord,
    /// The reception joined an already open cache entry.
    pub merged: bool,
}

/// Groups receptions by [`CorrelationKey`] and keeps one
/// [`DerivedSenderRecord`] per sender.
///
/// Cache entries expire a fixed window after their first reception. Expiry
/// never retracts a record that was already emitted.
pub struct ReceptionCorrelator {
    cache: WindowedMap<CorrelationKey, MessageCacheEntry>,
    records: BTreeMap<String, SensorEntry>,
}

impl ReceptionCorrelator {
    pub fn new(window_ms: u64) -> Self {
        Self {
            cache: WindowedMap::new(window_ms),
            records: BTreeMap::new(),
        }
    }

    /// Replace the record set, typically with persisted records at startup.
    pub fn restore(&mut self, records: BTreeMap<String, SensorEntry>) -> usize {
        self.records = records;
        self.records.len()
    }

    pub fn records(&self) -> &BTreeMap<String, SensorEntry> {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut BTreeMap<String, SensorEntry> {
        &mut self.records
    }

    pub fn record(&self, record_id: &str) -> Option<&DerivedSenderRecord> {
        self.records.get(record_id).map(|entry| &entry.attributes)
    }

    /// Cache entries currently held, expired or not.
    pub fn open_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn on_reception(
        &mut self,
        event: &ReceptionEvent,
        resolvers: &mut Resolvers<'_>,
        now_ms: u64,
    ) -> Option<Emitted> {
        self.cache.prune(now_ms);

        let (sender, message) = split_sender(&event.text);
        let key = CorrelationKey {
            channel: event.channel,
            timestamp: event.message_timestamp,
            sender: sender.clone(),
        };
        let reception = Reception {
            hop_count: event.hop_count,
            snr: event.snr,
            rssi: event.rssi,
            path_nodes: event.path_nodes.clone(),
            observed_at_ms: now_ms,
        };
        debug!(
            sender = %sender,
            hops = reception.hop_count,
            snr = reception.snr,
            rssi = reception.rssi,
            path = %reception.path_label(),
            "reception"
        );

        let (entry, created) = self.cache.get_or_insert_with(key, now_ms, || MessageCacheEntry {
            sender_name: sender,
            channel: event.channel,
            raw_text: event.text.clone(),
            message_text: message,
            message_timestamp: event.message_timestamp,
            receptions: Vec::new(),
            first_seen_ms: now_ms,
        });
        entry.receptions.push(reception);
        let entry = entry.clone();

        let record = self.channel_record(&entry, resolvers, now_ms)?;
        Some(Emitted {
            record: self.store(record),
            merged: !created,
        })
    }

    /// A decoded channel message. Receptions already captured for it make
    /// this a no-op; otherwise a single-reception record is synthesized.
    pub fn on_channel_message(
        &mut self,
        event: &ChannelMessageEvent,
        resolvers: &mut Resolvers<'_>,
        now_ms: u64,
    ) -> Option<Emitted> {
        self.cache.prune(now_ms);

        let (sender, message) = split_sender(&event.text);
        let key = CorrelationKey {
            channel: event.channel,
            timestamp: event.sender_timestamp,
            sender: sender.clone(),
        };
        if let Some(entry) = self.cache.get(&key, now_ms)
            && !entry.receptions.is_empty()
        {
            debug!(
                sender = %sender,
                receptions = entry.receptions.len(),
                "channel message already correlated"
            );
            return None;
        }

        let entry = MessageCacheEntry {
            sender_name: sender,
            channel: event.channel,
            raw_text: event.text.clone(),
            message_text: message,
            message_timestamp: event.sender_timestamp,
            receptions: vec![Reception {
                hop_count: event.hop_count,
                snr: event.snr,
                rssi: None,
                path_nodes: Vec::new(),
                observed_at_ms: now_ms,
            }],
            first_seen_ms: now_ms,
        };
        let mut record = self.channel_record(&entry, resolvers, now_ms)?;
        record.data_source = DataSource::ChannelMessage;
        Some(Emitted {
            record: self.store(record),
            merged: false,
        })
    }

    pub fn on_direct_message(
        &mut self,
        event: &DirectMessageEvent,
        resolvers: &mut Resolvers<'_>,
        now_ms: u64,
    ) -> Option<Emitted> {
        self.cache.prune(now_ms);

        let key = event.sender_key.clone();
        let sender_name = resolvers.identity.display_name(&key);
        let rssi = event.rssi.or_else(|| self.borrowed_rssi(&event.text, now_ms));
        let reception = Reception {
            hop_count: event.hop_count,
            snr: event.snr,
            rssi,
            path_nodes: Vec::new(),
            observed_at_ms: now_ms,
        };

        let record = DerivedSenderRecord {
            record_id: key.clone(),
            sender_name,
            coordinate: locate(resolvers.locations, Some(&key), ""),
            canonical_key: Some(key),
            message_type: MessageType::Direct,
            channel: None,
            hop_count: event.hop_count,
            snr: event.snr,
            rssi,
            path_nodes: Vec::new(),
            max_hops: event.hop_count,
            receptions: vec![reception],
            reception_count: 1,
            last_message_text: truncate_chars(&event.text, MESSAGE_PREVIEW_CHARS),
            last_message_at_ms: Some(now_ms),
            last_seen_ms: now_ms,
            data_source: DataSource::DirectMessage,
        };
        debug!(
            sender = %record.sender_name,
            hops = record.hop_count,
            snr = record.snr,
            rssi = record.rssi,
            "direct message"
        );
        Some(Emitted {
            record: self.store(record),
            merged: false,
        })
    }

    /// Signal-only record from an advertisement.
    pub fn on_advertisement(
        &mut self,
        event: &AdvertisementEvent,
        resolvers: &mut Resolvers<'_>,
        now_ms: u64,
    ) -> Option<Emitted> {
        let name = resolvers.identity.display_name(&event.sender_key);
        self.signal_record(
            &event.sender_key,
            name,
            event.snr,
            event.rssi,
            DataSource::Advertisement,
            resolvers,
            now_ms,
        )
    }

    /// Signal-only record from a contact's last reported SNR/RSSI.
    pub fn on_contact_signal(
        &mut self,
        key: &str,
        name: Option<&str>,
        snr: Option<f64>,
        rssi: Option<f64>,
        resolvers: &mut Resolvers<'_>,
        now_ms: u64,
    ) -> Option<Emitted> {
        if snr.is_none() && rssi.is_none() {
            return None;
        }
        let name = name
            .map(strip_contact_suffix)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| resolvers.identity.display_name(key));
        self.signal_record(key, name, snr, rssi, DataSource::Contact, resolvers, now_ms)
    }

    #[allow(clippy::too_many_arguments)]
    fn signal_record(
        &mut self,
        key: &str,
        sender_name: String,
        snr: Option<f64>,
        rssi: Option<f64>,
        data_source: DataSource,
        resolvers: &mut Resolvers<'_>,
        now_ms: u64,
    ) -> Option<Emitted> {
        if self
            .records
            .get(key)
            .is_some_and(|entry| entry.attributes.data_source.is_message())
        {
            debug!(key, source = ?data_source, "keeping message record over signal update");
            return None;
        }

        let record = DerivedSenderRecord {
            record_id: key.to_string(),
            sender_name,
            canonical_key: Some(key.to_string()),
            message_type: MessageType::Advertisement,
            channel: None,
            coordinate: locate(resolvers.locations, Some(key), ""),
            hop_count: 0,
            snr,
            rssi,
            path_nodes: Vec::new(),
            max_hops: 0,
            receptions: Vec::new(),
            reception_count: 0,
            last_message_text: String::new(),
            last_message_at_ms: None,
            last_seen_ms: now_ms,
            data_source,
        };
        debug!(sender = %record.sender_name, snr, rssi, "signal update");
        Some(Emitted {
            record: self.store(record),
            merged: false,
        })
    }

    fn channel_record(
        &self,
        entry: &MessageCacheEntry,
        resolvers: &mut Resolvers<'_>,
        now_ms: u64,
    ) -> Option<DerivedSenderRecord> {
        let best = best_reception(&entry.receptions)?;
        let longest = longest_path(&entry.receptions)?;

        let canonical_key = resolvers.identity.resolve(&entry.sender_name, now_ms);
        let record_id = match &canonical_key {
            Some(key) => key.clone(),
            None => {
                let pseudo = sanitize_name(&entry.sender_name);
                warn!(
                    sender = %entry.sender_name,
                    record_id = %pseudo,
                    "no key for sender, using name-based record"
                );
                pseudo
            },
        };

        Some(DerivedSenderRecord {
            record_id,
            sender_name: entry.sender_name.clone(),
            coordinate: locate(
                resolvers.locations,
                canonical_key.as_deref(),
                &entry.sender_name,
            ),
            canonical_key,
            message_type: MessageType::Channel,
            channel: entry.channel,
            hop_count: best.hop_count,
            snr: best.snr,
            rssi: best.rssi,
            path_nodes: longest.path_nodes.clone(),
            max_hops: longest.hop_count,
            receptions: entry.receptions.clone(),
            reception_count: entry.receptions.len(),
            last_message_text: truncate_chars(&entry.message_text, MESSAGE_PREVIEW_CHARS),
            last_message_at_ms: Some(now_ms),
            last_seen_ms: now_ms,
            data_source: DataSource::RxLog,
        })
    }

    /// RSSI of an open reception whose text starts like `text`.
    fn borrowed_rssi(&self, text: &str, now_ms: u64) -> Option<f64> {
        let opening = truncate_chars(text, TEXT_MATCH_CHARS);
        if opening.is_empty() {
            return None;
        }
        let entry = self.cache.values(now_ms).find(|entry| {
            truncate_chars(&entry.raw_text, TEXT_MATCH_CHARS) == opening
                || truncate_chars(&entry.message_text, TEXT_MATCH_CHARS) == opening
        })?;
        best_reception(&entry.receptions)
            .and_then(|best| best.rssi)
            .or_else(|| entry.receptions.iter().find_map(|r| r.rssi))
    }

    fn store(&mut self, record: DerivedSenderRecord) -> DerivedSenderRecord {
        self.records
            .insert(record.record_id.clone(), SensorEntry::from(record.clone()));
        record
    }
}

fn locate(locations: &LocationResolver, key: Option<&str>, name: &str) -> Option<Coordinate> {
    match key {
        Some(key) => locations.locate(key),
        None => locations.locate(name),
    }
    .map(|location| location.coordinate)
}
