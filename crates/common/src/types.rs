//! Node identity types shared by the resolvers, trackers and exports.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

/// Role of a node in the mesh.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NodeClass {
    Client,
    Repeater,
    Room,
    #[default]
    Unknown,
}

impl NodeClass {
    /// Parse a free-form class label such as `"Repeater"` or `"Room Server"`.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        let lower = label.to_lowercase();
        if lower.contains("repeater") {
            Self::Repeater
        } else if lower.contains("client") {
            Self::Client
        } else if lower.contains("room") {
            Self::Room
        } else {
            Self::Unknown
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Repeater => "repeater",
            Self::Room => "room",
            Self::Unknown => "unknown",
        }
    }

    /// Map-marker icon for this class.
    #[must_use]
    pub fn icon(self) -> &'static str {
        match self {
            Self::Repeater => "mdi:radio-tower",
            Self::Client => "mdi:cellphone-wireless",
            Self::Room => "mdi:forum",
            Self::Unknown => "mdi:access-point",
        }
    }
}

impl std::fmt::Display for NodeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    #[must_use]
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// `true` when latitude or longitude differ by more than `tolerance_deg`.
    #[must_use]
    pub fn differs_from(&self, other: &Coordinate, tolerance_deg: f64) -> bool {
        (self.lat - other.lat).abs() > tolerance_deg || (self.lon - other.lon).abs() > tolerance_deg
    }

    /// Squared planar distance in degrees. Only meaningful for ranking.
    #[must_use]
    pub fn squared_distance(&self, other: &Coordinate) -> f64 {
        let dlat = self.lat - other.lat;
        let dlon = self.lon - other.lon;
        dlat * dlat + dlon * dlon
    }
}

/// A node as known to the external registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Canonical key prefix, lowercase hex.
    pub key: String,
    /// Display name as advertised by the node.
    pub name: String,
    #[serde(default)]
    pub node_class: NodeClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<Coordinate>,
    /// Last advertisement heard from the node (epoch millis).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_advert_ms: Option<u64>,
    /// Free-form attributes written through `NodeRegistry::upsert`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl NodeIdentity {
    #[must_use]
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            node_class: NodeClass::Unknown,
            coordinate: None,
            last_advert_ms: None,
            attributes: Map::new(),
        }
    }

    #[must_use]
    pub fn with_class(mut self, node_class: NodeClass) -> Self {
        self.node_class = node_class;
        self
    }

    #[must_use]
    pub fn at(mut self, lat: f64, lon: f64) -> Self {
        self.coordinate = Some(Coordinate::new(lat, lon));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_class_labels() {
        assert_eq!(NodeClass::parse("Repeater"), NodeClass::Repeater);
        assert_eq!(NodeClass::parse("Room Server"), NodeClass::Room);
        assert_eq!(NodeClass::parse("CLIENT"), NodeClass::Client);
        assert_eq!(NodeClass::parse("sensor"), NodeClass::Unknown);
    }

    #[test]
    fn tolerance_is_per_axis() {
        let a = Coordinate::new(10.0, 20.0);
        assert!(a.differs_from(&Coordinate::new(10.01, 20.0), 0.001));
        assert!(!a.differs_from(&Coordinate::new(10.0002, 20.0002), 0.001));
    }
}
