//! External node registry seam.

use {
    meshtrace_common::{Coordinate, NodeClass, NodeIdentity},
    serde_json::{Map, Value},
};

use crate::{Error, Result};

/// Source of truth for known nodes.
///
/// Keys are stored lowercase. Path nodes in relay traces are short key
/// prefixes, so prefix lookups match in either direction: a stored key that
/// starts with the prefix, or a prefix that starts with a stored (shorter) key.
pub trait NodeRegistry: Send + Sync {
    /// Exact lookup by canonical key.
    fn get(&self, key: &str) -> Option<NodeIdentity>;

    /// All known nodes, ordered by key.
    fn list(&self) -> Vec<NodeIdentity>;

    /// Create or update a node. Known attributes (`name`, `node_type`, `lat`,
    /// `lon`, `last_advert`) update the typed fields; everything else is kept
    /// in [`NodeIdentity::attributes`].
    fn upsert(&self, key: &str, attrs: Map<String, Value>) -> Result<NodeIdentity>;

    /// Apply several updates at once. Registries with a backing file write
    /// it once. Returns the number of nodes updated.
    fn upsert_many(&self, updates: Vec<(String, Map<String, Value>)>) -> Result<usize> {
        let count = updates.len();
        for (key, attrs) in updates {
            self.upsert(&key, attrs)?;
        }
        Ok(count)
    }

    /// Re-read the backing source. No-op for registries without one.
    fn reload(&self) -> Result<usize> {
        Ok(self.list().len())
    }

    /// Nodes whose key shares `prefix` in either direction, ordered by key.
    fn matching_prefix(&self, prefix: &str) -> Vec<NodeIdentity> {
        let prefix = prefix.to_lowercase();
        self.list()
            .into_iter()
            .filter(|node| prefix_matches(&node.key, &prefix))
            .collect()
    }

    /// First node matching `prefix`.
    fn query_by_prefix(&self, prefix: &str) -> Option<NodeIdentity> {
        self.matching_prefix(prefix).into_iter().next()
    }
}

/// Bidirectional prefix match. An empty prefix matches nothing.
#[must_use]
pub fn prefix_matches(key: &str, prefix: &str) -> bool {
    !prefix.is_empty() && !key.is_empty() && (key.starts_with(prefix) || prefix.starts_with(key))
}

/// Lowercase and validate a node key (hex digits only).
pub(crate) fn normalize_key(key: &str) -> Result<String> {
    let key = key.trim().to_lowercase();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::invalid_key(key));
    }
    Ok(key)
}

/// Fold an attribute map into a node.
///
/// `last_advert` is epoch seconds as reported by the radio; `last_advert_ms`
/// is accepted as-is. A `(0, 0)` position means "not set".
pub(crate) fn apply_attributes(node: &mut NodeIdentity, attrs: Map<String, Value>) {
    let mut lat = node.coordinate.map(|c| c.lat);
    let mut lon = node.coordinate.map(|c| c.lon);

    for (name, value) in attrs {
        match name.as_str() {
            "name" | "adv_name" => {
                if let Some(s) = value.as_str().filter(|s| !s.trim().is_empty()) {
                    node.name = s.trim().to_string();
                }
            },
            "node_type" | "type" | "node_class" => {
                if let Some(class) = parse_class(&value) {
                    node.node_class = class;
                }
            },
            "lat" | "latitude" | "adv_lat" => lat = value.as_f64().or(lat),
            "lon" | "longitude" | "adv_lon" => lon = value.as_f64().or(lon),
            "last_advert" => {
                if let Some(secs) = value.as_u64() {
                    node.last_advert_ms = Some(secs.saturating_mul(1_000));
                }
            },
            "last_advert_ms" => {
                if let Some(ms) = value.as_u64() {
                    node.last_advert_ms = Some(ms);
                }
            },
            _ => {
                node.attributes.insert(name, value);
            },
        }
    }

    node.coordinate = match (lat, lon) {
        (Some(lat), Some(lon)) if lat != 0.0 || lon != 0.0 => Some(Coordinate::new(lat, lon)),
        _ => None,
    };
}

/// Numeric radio types are 1 = client, 2 = repeater, 3 = room.
fn parse_class(value: &Value) -> Option<NodeClass> {
    match value {
        Value::String(s) => Some(NodeClass::parse(s)),
        Value::Number(n) => match n.as_u64()? {
            1 => Some(NodeClass::Client),
            2 => Some(NodeClass::Repeater),
            3 => Some(NodeClass::Room),
            _ => Some(NodeClass::Unknown),
        },
        _ => None,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    #[rstest]
    #[case("a1b2c3", "a1", true)]
    #[case("a1", "a1b2c3", true)]
    #[case("a1b2c3", "a2", false)]
    #[case("a1b2c3", "", false)]
    fn bidirectional_prefix(#[case] key: &str, #[case] prefix: &str, #[case] expected: bool) {
        assert_eq!(prefix_matches(key, prefix), expected);
    }

    #[test]
    fn rejects_non_hex_keys() {
        assert_eq!(normalize_key(" A1B2 ").unwrap(), "a1b2");
        assert!(normalize_key("relay").is_err());
        assert!(normalize_key("").is_err());
    }

    #[test]
    fn applies_typed_and_free_attributes() {
        let mut node = NodeIdentity::new("a1b2", "a1b2");
        let attrs = json!({
            "adv_name": "Hilltop",
            "type": 2,
            "adv_lat": 51.5,
            "adv_lon": -0.12,
            "last_advert": 1_700_000_000u64,
            "last_message": 42
        });
        apply_attributes(&mut node, attrs.as_object().cloned().unwrap());
        assert_eq!(node.name, "Hilltop");
        assert_eq!(node.node_class, NodeClass::Repeater);
        assert_eq!(node.coordinate, Some(Coordinate::new(51.5, -0.12)));
        assert_eq!(node.last_advert_ms, Some(1_700_000_000_000));
        assert_eq!(node.attributes.get("last_message"), Some(&json!(42)));
    }

    #[test]
    fn zero_position_clears_coordinate() {
        let mut node = NodeIdentity::new("a1b2", "Hilltop").at(51.5, -0.12);
        let attrs = json!({"lat": 0.0, "lon": 0.0});
        apply_attributes(&mut node, attrs.as_object().cloned().unwrap());
        assert_eq!(node.coordinate, None);
    }
}
