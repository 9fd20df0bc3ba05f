//! Per-sender derived records.

use {
    meshtrace_common::{Coordinate, time::format_rfc3339},
    meshtrace_persistence::Expire,
    serde::{Deserialize, Serialize},
};

use crate::reception::{Reception, path_label};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Channel,
    Direct,
    Advertisement,
}

/// What produced the record's latest update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    RxLog,
    DirectMessage,
    ChannelMessage,
    Advertisement,
    Contact,
}

impl DataSource {
    /// Message-derived records are never replaced by signal-only updates.
    pub fn is_message(self) -> bool {
        matches!(self, Self::RxLog | Self::DirectMessage | Self::ChannelMessage)
    }
}

/// Consolidated view of one sender's latest message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedSenderRecord {
    /// Canonical key, or the sanitized display name when unresolved.
    pub record_id: String,
    pub sender_name: String,
    #[serde(default)]
    pub canonical_key: Option<String>,
    pub message_type: MessageType,
    #[serde(default)]
    pub channel: Option<u32>,
    #[serde(default)]
    pub coordinate: Option<Coordinate>,
    /// Best reception's hop count.
    pub hop_count: u32,
    #[serde(default)]
    pub snr: Option<f64>,
    #[serde(default)]
    pub rssi: Option<f64>,
    /// Longest observed path.
    #[serde(default)]
    pub path_nodes: Vec<String>,
    #[serde(default)]
    pub max_hops: u32,
    #[serde(default)]
    pub receptions: Vec<Reception>,
    #[serde(default)]
    pub reception_count: usize,
    #[serde(default)]
    pub last_message_text: String,
    #[serde(default)]
    pub last_message_at_ms: Option<u64>,
    pub last_seen_ms: u64,
    pub data_source: DataSource,
}

impl DerivedSenderRecord {
    pub fn longest_path_label(&self) -> String {
        path_label(&self.path_nodes)
    }

    /// Time used for expiry and activity filters.
    pub fn activity_ms(&self) -> u64 {
        self.last_message_at_ms.unwrap_or(self.last_seen_ms)
    }

    pub fn last_message_formatted(&self) -> Option<String> {
        self.last_message_at_ms.map(format_rfc3339)
    }
}

/// A record as persisted: state (best hop count) plus attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorEntry {
    pub state: String,
    pub attributes: DerivedSenderRecord,
}

impl From<DerivedSenderRecord> for SensorEntry {
    fn from(record: DerivedSenderRecord) -> Self {
        Self {
            state: record.hop_count.to_string(),
            attributes: record,
        }
    }
}

impl Expire for SensorEntry {
    fn expire(&mut self, cutoff_ms: u64) -> bool {
        self.attributes.activity_ms() < cutoff_ms
    }
}
