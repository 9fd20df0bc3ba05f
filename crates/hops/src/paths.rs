//! Path tracing with debounce.

use std::collections::{BTreeMap, BTreeSet};

use {
    meshtrace_common::{
        Coordinate, NodeClass,
        names::{normalize_display_name, sanitize_name},
        time::is_older_than,
    },
    meshtrace_identity::LocationResolver,
    serde::Serialize,
    tracing::debug,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathPoint {
    pub key: String,
    pub name: String,
    pub node_class: NodeClass,
    pub coordinate: Coordinate,
}

/// Located relays of a sender's latest traced path, in path order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathTrace {
    /// Sanitized sender name.
    pub id: String,
    pub sender_name: String,
    pub points: Vec<PathPoint>,
    pub last_message_at_ms: u64,
    pub traced_at_ms: u64,
}

/// Relays and links of an admitted path that were not counted before for
/// the same message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Admission {
    pub relays: Vec<String>,
    pub links: Vec<(String, String)>,
}

struct DrawnPath {
    drawn_at_ms: u64,
    max_hops: u32,
    relays: Vec<String>,
    links: BTreeSet<(String, String)>,
}

impl DrawnPath {
    fn new(now_ms: u64) -> Self {
        Self {
            drawn_at_ms: now_ms,
            max_hops: 0,
            relays: Vec::new(),
            links: BTreeSet::new(),
        }
    }

    /// Take whatever `path_nodes` adds over what was already counted.
    fn extend(&mut self, path_nodes: &[String], max_hops: u32) -> Admission {
        let path: Vec<String> = path_nodes
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        let mut counted = self.relays.clone();
        let mut admission = Admission::default();
        for relay in &path {
            match counted.iter().position(|c| c == relay) {
                Some(at) => {
                    counted.swap_remove(at);
                },
                None => {
                    self.relays.push(relay.clone());
                    admission.relays.push(relay.clone());
                },
            }
        }
        for pair in path.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a == b {
                continue;
            }
            let link = if a < b {
                (a.clone(), b.clone())
            } else {
                (b.clone(), a.clone())
            };
            if self.links.insert(link) {
                admission.links.push((a.clone(), b.clone()));
            }
        }
        self.max_hops = self.max_hops.max(max_hops);
        admission
    }
}

/// Debounces repeated paths and keeps one trace per sender.
///
/// A message is identified by sender name and first reception time. Within
/// the debounce interval it is admitted again only when a longer copy
/// arrives, and then only its new relays and links are handed out. Entries
/// are forgotten after the retention interval.
pub struct PathTracer {
    debounce_ms: u64,
    retention_ms: u64,
    drawn: BTreeMap<(String, u64), DrawnPath>,
    traces: BTreeMap<String, PathTrace>,
}

impl PathTracer {
    pub fn new(debounce_ms: u64, retention_ms: u64) -> Self {
        Self {
            debounce_ms,
            retention_ms,
            drawn: BTreeMap::new(),
            traces: BTreeMap::new(),
        }
    }

    /// Decide whether the path of `sender_name`'s message first heard at
    /// `heard_at_ms` should be traced now, and what it adds.
    pub fn admit(
        &mut self,
        sender_name: &str,
        heard_at_ms: u64,
        path_nodes: &[String],
        max_hops: u32,
        now_ms: u64,
    ) -> Option<Admission> {
        let retention_ms = self.retention_ms;
        self.drawn
            .retain(|_, drawn| !is_older_than(drawn.drawn_at_ms, now_ms, retention_ms));

        let debounce_ms = self.debounce_ms;
        let drawn = self
            .drawn
            .entry((sender_name.to_string(), heard_at_ms))
            .or_insert_with(|| DrawnPath::new(now_ms));
        let debounced = now_ms.saturating_sub(drawn.drawn_at_ms) < debounce_ms;
        if debounced && drawn.max_hops > 0 && max_hops <= drawn.max_hops {
            debug!(sender = sender_name, max_hops, "path debounced");
            return None;
        }
        if !debounced {
            *drawn = DrawnPath::new(now_ms);
        }
        Some(drawn.extend(path_nodes, max_hops))
    }

    /// Locate every relay in `path_nodes` and store the trace when at least
    /// two of them have a position.
    pub fn trace(
        &mut self,
        sender_name: &str,
        path_nodes: &[String],
        locations: &LocationResolver,
        last_message_at_ms: u64,
        now_ms: u64,
    ) -> Option<PathTrace> {
        let points: Vec<PathPoint> = path_nodes
            .iter()
            .filter_map(|prefix| {
                let loc = locations.locate_prefix(prefix);
                if loc.is_none() {
                    debug!(prefix = %prefix, "no position for relay");
                }
                loc
            })
            .map(|loc| PathPoint {
                key: loc.key,
                name: normalize_display_name(&loc.name),
                node_class: loc.node_class,
                coordinate: loc.coordinate,
            })
            .collect();

        if points.len() < 2 {
            debug!(
                sender = sender_name,
                located = points.len(),
                "not enough located relays to trace"
            );
            return None;
        }

        let trace = PathTrace {
            id: sanitize_name(sender_name),
            sender_name: normalize_display_name(sender_name),
            points,
            last_message_at_ms,
            traced_at_ms: now_ms,
        };
        self.traces.insert(trace.id.clone(), trace.clone());
        Some(trace)
    }

    pub fn traces(&self) -> &BTreeMap<String, PathTrace> {
        &self.traces
    }

    /// Debounce entries currently remembered.
    pub fn remembered(&self) -> usize {
        self.drawn.len()
    }
}
