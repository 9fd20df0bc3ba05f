//! Inbound events, decoded once at the boundary.
//!
//! Two shapes are accepted. The flat shape carries a `kind` tag next to the
//! fields:
//!
//! ```json
//! {"kind": "reception", "snr": 7.5, "hop_count": 2, "path_nodes": ["a1", "b2"],
//!  "channel": 0, "decoded_text": "Alice: hi", "message_timestamp": 1717000000}
//! ```
//!
//! The bridge envelope wraps a payload under an `event_type` such as
//! `EventType.RX_LOG_DATA`, with reception details nested in `parsed` and
//! `decrypted`. Missing or malformed fields decode to defaults.

use {
    serde_json::{Map, Value},
    tracing::debug,
};

use crate::{Error, Result};

/// Registry keys are the first 12 hex characters of a public key.
pub const PUBKEY_PREFIX_LEN: usize = 12;

/// One overheard copy of a channel packet.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceptionEvent {
    pub snr: Option<f64>,
    pub rssi: Option<f64>,
    pub hop_count: u32,
    pub path_nodes: Vec<String>,
    pub channel: Option<u32>,
    /// Full decoded text, `"Sender: message"`.
    pub text: String,
    pub message_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectMessageEvent {
    pub sender_key: String,
    pub text: String,
    pub hop_count: u32,
    pub snr: Option<f64>,
    pub rssi: Option<f64>,
    pub sender_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessageEvent {
    pub channel: Option<u32>,
    pub text: String,
    pub hop_count: u32,
    pub snr: Option<f64>,
    pub sender_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdvertisementEvent {
    pub sender_key: String,
    pub snr: Option<f64>,
    pub rssi: Option<f64>,
}

/// A contact appeared or changed in the upstream contact list.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactUpdateEvent {
    pub key: String,
    pub attributes: Map<String, Value>,
}

impl ContactUpdateEvent {
    pub fn name(&self) -> Option<String> {
        str_field(&self.attributes, &["name", "adv_name", "friendly_name"])
    }

    pub fn last_snr(&self) -> Option<f64> {
        float_field(&self.attributes, &["last_snr"])
    }

    pub fn last_rssi(&self) -> Option<f64> {
        float_field(&self.attributes, &["last_rssi"])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    Reception(ReceptionEvent),
    DirectMessage(DirectMessageEvent),
    ChannelMessage(ChannelMessageEvent),
    Advertisement(AdvertisementEvent),
    ContactUpdate(ContactUpdateEvent),
}

impl RawEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reception(_) => "reception",
            Self::DirectMessage(_) => "direct_message",
            Self::ChannelMessage(_) => "channel_message",
            Self::Advertisement(_) => "advertisement",
            Self::ContactUpdate(_) => "contact_update",
        }
    }

    /// Decode either event shape. `None` for event types that carry nothing
    /// to track and for receptions that could not be decrypted.
    pub fn decode(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let (kind, payload) = match object.get("event_type").and_then(Value::as_str) {
            Some(event_type) => {
                let kind = match event_type.trim_start_matches("EventType.") {
                    "RX_LOG_DATA" => "reception",
                    "CONTACT_MSG_RECV" => "direct_message",
                    "CHANNEL_MSG_RECV" => "channel_message",
                    "ADVERTISEMENT" => "advertisement",
                    "NEW_CONTACT" => "contact_update",
                    _ => return None,
                };
                let payload = object.get("payload").and_then(Value::as_object)?;
                (kind, payload)
            },
            None => (object.get("kind").and_then(Value::as_str)?, object),
        };

        match kind {
            "reception" => decode_reception(payload).map(Self::Reception),
            "direct_message" => decode_direct(payload).map(Self::DirectMessage),
            "channel_message" => Some(Self::ChannelMessage(decode_channel(payload))),
            "advertisement" => decode_advert(payload).map(Self::Advertisement),
            "contact_update" => decode_contact(payload).map(Self::ContactUpdate),
            _ => None,
        }
    }

    /// Decode one JSON line. Blank lines and untracked events are `Ok(None)`.
    pub fn from_json_line(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let value: Value = serde_json::from_str(line)?;
        if !value.is_object() {
            return Err(Error::unsupported("event is not a JSON object"));
        }
        Ok(Self::decode(&value))
    }
}

fn decode_reception(payload: &Map<String, Value>) -> Option<ReceptionEvent> {
    let parsed = payload
        .get("parsed")
        .and_then(Value::as_object)
        .unwrap_or(payload);
    let decrypted = payload
        .get("decrypted")
        .and_then(Value::as_object)
        .unwrap_or(payload);

    let text = str_field(decrypted, &["text", "decoded_text"]).unwrap_or_default();
    let was_decrypted = decrypted
        .get("decrypted")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if text.is_empty() && !was_decrypted {
        debug!(
            snr = float_field(payload, &["snr", "SNR"]),
            rssi = float_field(payload, &["rssi", "RSSI"]),
            "undecrypted reception"
        );
        return None;
    }

    let mut path_nodes = string_list(parsed, "path_nodes");
    if path_nodes.is_empty() {
        path_nodes = split_path_hex(&str_field(parsed, &["path"]).unwrap_or_default());
    }
    let hop_count =
        uint_field(parsed, &["path_len", "hop_count"]).unwrap_or(path_nodes.len() as u32);

    Some(ReceptionEvent {
        snr: float_field(payload, &["snr", "SNR"]),
        rssi: float_field(payload, &["rssi", "RSSI"]),
        hop_count,
        path_nodes,
        channel: uint_field(decrypted, &["channel_idx", "channel"]),
        text,
        message_timestamp: int_field(decrypted, &["timestamp", "message_timestamp"]),
    })
}

fn decode_direct(payload: &Map<String, Value>) -> Option<DirectMessageEvent> {
    let sender_key = key_field(payload)?;
    Some(DirectMessageEvent {
        sender_key,
        text: str_field(payload, &["text"]).unwrap_or_default(),
        hop_count: uint_field(payload, &["path_len", "hop_count"]).unwrap_or(0),
        snr: float_field(payload, &["SNR", "snr"]),
        rssi: float_field(payload, &["RSSI", "rssi"]),
        sender_timestamp: int_field(payload, &["sender_timestamp"]),
    })
}

fn decode_channel(payload: &Map<String, Value>) -> ChannelMessageEvent {
    ChannelMessageEvent {
        channel: uint_field(payload, &["channel_idx", "channel"]),
        text: str_field(payload, &["text"]).unwrap_or_default(),
        hop_count: uint_field(payload, &["path_len", "hop_count"]).unwrap_or(0),
        snr: float_field(payload, &["SNR", "snr"]),
        sender_timestamp: int_field(payload, &["sender_timestamp"]),
    }
}

fn decode_advert(payload: &Map<String, Value>) -> Option<AdvertisementEvent> {
    Some(AdvertisementEvent {
        sender_key: key_field(payload)?,
        snr: float_field(payload, &["SNR", "snr"]),
        rssi: float_field(payload, &["RSSI", "rssi"]),
    })
}

fn decode_contact(payload: &Map<String, Value>) -> Option<ContactUpdateEvent> {
    let key = key_field(payload)?;
    let attributes = match payload.get("attributes").and_then(Value::as_object) {
        Some(attributes) => attributes.clone(),
        None => payload
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "kind" | "key" | "public_key" | "pubkey_prefix"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    };
    Some(ContactUpdateEvent { key, attributes })
}

/// Sender key, lowercased and cut to the registry prefix length.
fn key_field(payload: &Map<String, Value>) -> Option<String> {
    let key = str_field(payload, &["pubkey_prefix", "sender_key", "public_key", "key"])?;
    let key: String = key.trim().to_lowercase().chars().take(PUBKEY_PREFIX_LEN).collect();
    (!key.is_empty()).then_some(key)
}

fn field<'a>(payload: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| payload.get(*name).filter(|v| !v.is_null()))
}

fn str_field(payload: &Map<String, Value>, names: &[&str]) -> Option<String> {
    field(payload, names).and_then(|v| v.as_str().map(str::to_string))
}

fn float_field(payload: &Map<String, Value>, names: &[&str]) -> Option<f64> {
    let value = field(payload, names)?;
    value
        .as_f64()
        .or_else(|| value.as_str()?.trim().parse().ok())
        .filter(|f| f.is_finite())
}

fn int_field(payload: &Map<String, Value>, names: &[&str]) -> Option<i64> {
    let value = field(payload, names)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .or_else(|| value.as_str()?.trim().parse().ok())
}

fn uint_field(payload: &Map<String, Value>, names: &[&str]) -> Option<u32> {
    int_field(payload, names).and_then(|n| u32::try_from(n).ok())
}

fn string_list(payload: &Map<String, Value>, name: &str) -> Vec<String> {
    payload
        .get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// `"a1b2c3"` → `["a1", "b2", "c3"]`. A trailing odd character is dropped.
fn split_path_hex(path: &str) -> Vec<String> {
    let chars: Vec<char> = path.trim().to_lowercase().chars().collect();
    chars
        .chunks_exact(2)
        .map(|pair| pair.iter().collect())
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn decodes_flat_reception() {
        let event = RawEvent::decode(&json!({
            "kind": "reception",
            "snr": 7.5,
            "rssi": -92,
            "hop_count": 2,
            "path_nodes": ["A1", "b2"],
            "channel": 0,
            "decoded_text": "Alice: hello",
            "message_timestamp": 1_717_000_000
        }))
        .unwrap();
        let RawEvent::Reception(r) = event else {
            panic!("expected reception");
        };
        assert_eq!(r.hop_count, 2);
        assert_eq!(r.path_nodes, ["a1", "b2"]);
        assert_eq!(r.rssi, Some(-92.0));
        assert_eq!(r.channel, Some(0));
        assert_eq!(r.message_timestamp, Some(1_717_000_000));
    }

    #[test]
    fn decodes_bridge_envelope_with_hex_path() {
        let event = RawEvent::decode(&json!({
            "event_type": "EventType.RX_LOG_DATA",
            "payload": {
                "snr": 3.25,
                "parsed": {"path": "a1b2c3"},
                "decrypted": {"channel_idx": 1, "text": "Bob: yo", "timestamp": 42}
            }
        }))
        .unwrap();
        let RawEvent::Reception(r) = event else {
            panic!("expected reception");
        };
        assert_eq!(r.path_nodes, ["a1", "b2", "c3"]);
        assert_eq!(r.hop_count, 3);
        assert_eq!(r.channel, Some(1));
        assert_eq!(r.rssi, None);
    }

    #[test]
    fn undecrypted_receptions_are_dropped() {
        let event = RawEvent::decode(&json!({
            "event_type": "EventType.RX_LOG_DATA",
            "payload": {"snr": 1.0, "parsed": {"path_len": 1}, "decrypted": {}}
        }));
        assert!(event.is_none());
    }

    #[test]
    fn malformed_fields_default() {
        let event = RawEvent::decode(&json!({
            "kind": "channel_message",
            "text": "Carol: hi",
            "hop_count": "lots",
            "snr": "n/a"
        }))
        .unwrap();
        assert_eq!(
            event,
            RawEvent::ChannelMessage(ChannelMessageEvent {
                channel: None,
                text: "Carol: hi".into(),
                hop_count: 0,
                snr: None,
                sender_timestamp: None,
            })
        );
    }

    #[test]
    fn direct_messages_need_a_sender_key() {
        assert!(RawEvent::decode(&json!({"kind": "direct_message", "text": "x"})).is_none());
        let event = RawEvent::decode(&json!({
            "event_type": "CONTACT_MSG_RECV",
            "payload": {"pubkey_prefix": "A1B2C3D4E5F6A7", "text": "ping", "SNR": 4}
        }))
        .unwrap();
        let RawEvent::DirectMessage(dm) = event else {
            panic!("expected direct message");
        };
        assert_eq!(dm.sender_key, "a1b2c3d4e5f6");
        assert_eq!(dm.snr, Some(4.0));
    }

    #[test]
    fn contact_updates_keep_remaining_fields_as_attributes() {
        let event = RawEvent::decode(&json!({
            "kind": "contact_update",
            "key": "a1b2c3d4e5f6",
            "name": "Hilltop (Repeater)",
            "last_snr": 6.5
        }))
        .unwrap();
        let RawEvent::ContactUpdate(update) = event else {
            panic!("expected contact update");
        };
        assert_eq!(update.name().as_deref(), Some("Hilltop (Repeater)"));
        assert_eq!(update.last_snr(), Some(6.5));
        assert!(!update.attributes.contains_key("key"));
    }

    #[test]
    fn json_lines() {
        assert!(RawEvent::from_json_line("   ").unwrap().is_none());
        assert!(RawEvent::from_json_line("{\"event_type\": \"EventType.BATTERY\", \"payload\": {}}")
            .unwrap()
            .is_none());
        assert!(RawEvent::from_json_line("[1, 2]").is_err());
        assert!(RawEvent::from_json_line("{nope").is_err());
        let event = RawEvent::from_json_line(r#"{"kind": "advertisement", "sender_key": "beef01"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.kind(), "advertisement");
    }
}
