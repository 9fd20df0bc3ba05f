//! Export documents and snapshot inputs built from engine state.
//!
//! Everything here is a pure function of the state handed in, so exports and
//! snapshots can be rebuilt at any time.

use std::collections::BTreeMap;

use {
    meshtrace_common::{
        Coordinate, NodeIdentity,
        names::strip_contact_suffix,
        time::{HOUR_MS, format_rfc3339, is_older_than},
    },
    meshtrace_hops::{DirectLinkGraph, HopMarker, HopNodeTracker, LinkStat, PathTrace, PathTracer},
    meshtrace_identity::{Location, LocationResolver, PrefixPreference},
    meshtrace_snapshots::{SnapshotInput, SnapshotNode},
    serde_json::{Map, Value, json},
};

pub const HEATMAP: &str = "heatmap";
pub const DIRECT_LINKS: &str = "directlinks";
pub const NODEMAP: &str = "nodemap";
pub const HOP_ENTITIES: &str = "hop_entities";
pub const PATH_ENTITIES: &str = "path_entities";

fn hours(ms: u64) -> f64 {
    ms as f64 / HOUR_MS as f64
}

fn recent(timestamp_ms: u64, now_ms: u64, threshold_ms: u64) -> bool {
    !is_older_than(timestamp_ms, now_ms, threshold_ms)
}

fn path_json(trace: &PathTrace) -> Value {
    let coords: Vec<Value> = trace
        .points
        .iter()
        .map(|p| json!({"lat": p.coordinate.lat, "lon": p.coordinate.lon, "name": p.name}))
        .collect();
    json!({
        "sender": trace.sender_name,
        "coords": coords,
        "hops": trace.points.len(),
    })
}

/// Relays used within the threshold, busiest first, plus recent traced paths.
pub fn heatmap(
    markers: &[HopMarker],
    tracer: &PathTracer,
    threshold_ms: u64,
    now_ms: u64,
) -> Value {
    let mut nodes: Vec<&HopMarker> = markers
        .iter()
        .filter(|m| m.use_count > 0 && recent(m.last_used_ms, now_ms, threshold_ms))
        .collect();
    nodes.sort_by(|a, b| b.use_count.cmp(&a.use_count));
    let nodes: Vec<Value> = nodes
        .into_iter()
        .map(|m| {
            json!({
                "name": m.name,
                "lat": m.coordinate.lat,
                "lon": m.coordinate.lon,
                "use_count": m.use_count,
                "node_type": m.node_class.as_str(),
            })
        })
        .collect();

    let paths: Vec<Value> = tracer
        .traces()
        .values()
        .filter(|t| recent(t.last_message_at_ms, now_ms, threshold_ms))
        .map(path_json)
        .collect();

    json!({
        "threshold_hours": hours(threshold_ms),
        "node_count": nodes.len(),
        "path_count": paths.len(),
        "updated": format_rfc3339(now_ms),
        "nodes": nodes,
        "paths": paths,
    })
}

struct ResolvedLink {
    from: Location,
    to: Location,
    stat: LinkStat,
}

/// Directed links whose ends both resolve to a located node. Prefixes that
/// match several nodes resolve to a repeater when there is one.
fn resolved_links(
    graph: &DirectLinkGraph,
    locations: &LocationResolver,
    keep: impl Fn(&LinkStat) -> bool,
) -> Vec<ResolvedLink> {
    let mut cache: BTreeMap<String, Option<Location>> = BTreeMap::new();
    let mut resolve = |prefix: &str| -> Option<Location> {
        cache
            .entry(prefix.to_string())
            .or_insert_with(|| locations.locate_prefix_with(prefix, PrefixPreference::Repeater))
            .clone()
    };

    let mut links = Vec::new();
    for (a, neighbours) in graph.links() {
        let Some(from) = resolve(a.as_str()) else {
            continue;
        };
        for (b, stat) in neighbours {
            if !keep(stat) {
                continue;
            }
            let Some(to) = resolve(b.as_str()) else {
                continue;
            };
            if to.key == from.key {
                continue;
            }
            links.push(ResolvedLink {
                from: from.clone(),
                to,
                stat: *stat,
            });
        }
    }
    links
}

/// Located nodes with their link counts and the undirected links seen within
/// the threshold. A link heard in both directions is listed once with the
/// larger count.
pub fn direct_links(
    graph: &DirectLinkGraph,
    locations: &LocationResolver,
    threshold_ms: u64,
    now_ms: u64,
) -> Value {
    let links = resolved_links(graph, locations, |stat| {
        recent(stat.last_seen_ms, now_ms, threshold_ms)
    });

    let mut nodes: BTreeMap<&str, (&Location, u64)> = BTreeMap::new();
    let mut unique: BTreeMap<(&str, &str), (&ResolvedLink, u64)> = BTreeMap::new();
    for link in &links {
        nodes
            .entry(link.from.key.as_str())
            .or_insert((&link.from, 0))
            .1 += 1;

        let pair = if link.from.key <= link.to.key {
            (link.from.key.as_str(), link.to.key.as_str())
        } else {
            (link.to.key.as_str(), link.from.key.as_str())
        };
        unique
            .entry(pair)
            .and_modify(|(_, count)| *count = (*count).max(link.stat.count))
            .or_insert((link, link.stat.count));
    }

    let mut nodes: Vec<(&Location, u64)> = nodes.into_values().collect();
    nodes.sort_by(|a, b| b.1.cmp(&a.1));
    let nodes: Vec<Value> = nodes
        .into_iter()
        .map(|(loc, link_count)| {
            json!({
                "name": loc.name,
                "lat": loc.coordinate.lat,
                "lon": loc.coordinate.lon,
                "node_type": loc.node_class.as_str(),
                "link_count": link_count,
            })
        })
        .collect();
    let links: Vec<Value> = unique
        .into_values()
        .map(|(link, count)| {
            json!({
                "from_pubkey": link.from.key,
                "from_name": link.from.name,
                "from_lat": link.from.coordinate.lat,
                "from_lon": link.from.coordinate.lon,
                "to_pubkey": link.to.key,
                "to_name": link.to.name,
                "to_lat": link.to.coordinate.lat,
                "to_lon": link.to.coordinate.lon,
                "count": count,
            })
        })
        .collect();

    json!({
        "threshold_hours": hours(threshold_ms),
        "node_count": nodes.len(),
        "link_count": links.len(),
        "updated": format_rfc3339(now_ms),
        "nodes": nodes,
        "links": links,
    })
}

/// Registry nodes that advertised within the threshold, by name, with a
/// count per node class.
pub fn nodemap(nodes: &[NodeIdentity], threshold_ms: u64, now_ms: u64) -> Value {
    let mut located: Vec<(String, &NodeIdentity, Coordinate, u64)> = nodes
        .iter()
        .filter_map(|node| {
            let coordinate = node.coordinate?;
            let advert = node.last_advert_ms?;
            recent(advert, now_ms, threshold_ms)
                .then(|| (strip_contact_suffix(&node.name), node, coordinate, advert))
        })
        .collect();
    located.sort_by_key(|(name, ..)| name.to_lowercase());

    let mut type_counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut entries = Vec::with_capacity(located.len());
    for (name, node, coordinate, advert) in located {
        *type_counts.entry(node.node_class.as_str()).or_default() += 1;
        let age_hours = (hours(now_ms.saturating_sub(advert)) * 10.0).round() / 10.0;
        entries.push(json!({
            "name": name,
            "lat": coordinate.lat,
            "lon": coordinate.lon,
            "node_type": node.node_class.as_str(),
            "last_advert": advert,
            "age_hours": age_hours,
        }));
    }

    json!({
        "threshold_hours": hours(threshold_ms),
        "node_count": entries.len(),
        "type_counts": type_counts,
        "updated": format_rfc3339(now_ms),
        "nodes": entries,
    })
}

fn entities(ids: Vec<&str>, now_ms: u64) -> Value {
    json!({
        "count": ids.len(),
        "entities": ids,
        "updated": format_rfc3339(now_ms),
    })
}

/// Ids of relay markers used within the threshold.
pub fn hop_entities(markers: &[HopMarker], threshold_ms: u64, now_ms: u64) -> Value {
    let ids = markers
        .iter()
        .filter(|m| recent(m.last_used_ms, now_ms, threshold_ms))
        .map(|m| m.id.as_str())
        .collect();
    entities(ids, now_ms)
}

/// Ids of path traces whose message arrived within the threshold.
pub fn path_entities(tracer: &PathTracer, threshold_ms: u64, now_ms: u64) -> Value {
    let ids = tracer
        .traces()
        .values()
        .filter(|t| recent(t.last_message_at_ms, now_ms, threshold_ms))
        .map(|t| t.id.as_str())
        .collect();
    entities(ids, now_ms)
}

fn snapshot_extra(key: &str, items: Vec<Value>) -> Map<String, Value> {
    let mut extra = Map::new();
    extra.insert(key.to_string(), Value::Array(items));
    extra.insert("threshold_hours".into(), Value::Null);
    extra
}

/// Every located relay, unfiltered, with the traced paths.
pub fn heatmap_snapshot(hops: &HopNodeTracker, tracer: &PathTracer) -> SnapshotInput {
    let nodes = hops
        .nodes()
        .values()
        .filter_map(|usage| {
            let coordinate = usage.coordinate?;
            Some(SnapshotNode {
                name: usage.name.clone(),
                lat: coordinate.lat,
                lon: coordinate.lon,
                node_type: usage.node_class.as_str().to_string(),
                pubkey: usage.key.clone(),
                use_count: Some(usage.use_count),
                link_count: None,
                last_seen: Some(usage.last_used_ms),
            })
        })
        .collect();
    let paths = tracer.traces().values().map(path_json).collect();
    SnapshotInput {
        nodes,
        extra: snapshot_extra("paths", paths),
    }
}

/// Every resolvable link, unfiltered, with per-node link counts.
pub fn direct_links_snapshot(graph: &DirectLinkGraph, locations: &LocationResolver) -> SnapshotInput {
    let links = resolved_links(graph, locations, |_| true);

    let mut nodes: BTreeMap<String, SnapshotNode> = BTreeMap::new();
    let snapshot_node = |loc: &Location| SnapshotNode {
        name: loc.name.clone(),
        lat: loc.coordinate.lat,
        lon: loc.coordinate.lon,
        node_type: loc.node_class.as_str().to_string(),
        pubkey: loc.key.clone(),
        use_count: None,
        link_count: Some(0),
        last_seen: None,
    };
    let mut items = Vec::with_capacity(links.len());
    for link in &links {
        let from = nodes
            .entry(link.from.key.clone())
            .or_insert_with(|| snapshot_node(&link.from));
        from.link_count = Some(from.link_count.unwrap_or(0) + 1);
        from.last_seen = Some(from.last_seen.unwrap_or(0).max(link.stat.last_seen_ms));
        nodes
            .entry(link.to.key.clone())
            .or_insert_with(|| snapshot_node(&link.to));

        items.push(json!({
            "from_name": link.from.name,
            "from_lat": link.from.coordinate.lat,
            "from_lon": link.from.coordinate.lon,
            "to_name": link.to.name,
            "to_lat": link.to.coordinate.lat,
            "to_lon": link.to.coordinate.lon,
            "count": link.stat.count,
            "last_seen": link.stat.last_seen_ms,
        }));
    }

    SnapshotInput {
        nodes: nodes.into_values().collect(),
        extra: snapshot_extra("links", items),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        meshtrace_common::{NodeClass, time::DAY_MS},
        meshtrace_hops::HopUsage,
        meshtrace_identity::InMemoryRegistry,
        std::sync::Arc,
    };

    const NOW: u64 = 30 * DAY_MS;
    const WEEK: u64 = 7 * DAY_MS;

    fn registry_nodes() -> Vec<NodeIdentity> {
        vec![
            NodeIdentity::new("aa00000000a1", "Peak")
                .with_class(NodeClass::Repeater)
                .at(1.0, 1.0),
            NodeIdentity::new("bb00000000b2", "Valley Contact").at(2.0, 2.0),
            NodeIdentity::new("cc00000000c3", "Ridge").at(3.0, 3.0),
        ]
    }

    fn locations() -> LocationResolver {
        LocationResolver::new(Arc::new(InMemoryRegistry::with_nodes(registry_nodes())), None)
    }

    fn usage(key: &str, name: &str, uses: u64, last_used_ms: u64) -> (String, HopUsage) {
        (key.to_string(), HopUsage {
            key: key.to_string(),
            name: name.to_string(),
            node_class: NodeClass::Repeater,
            coordinate: Some(Coordinate::new(1.0, 2.0)),
            use_count: uses,
            last_used_ms,
        })
    }

    #[test]
    fn heatmap_keeps_recent_relays_busiest_first() {
        let mut hops = HopNodeTracker::new(0.001);
        hops.restore(
            [
                usage("aa01", "Quiet", 5, NOW),
                usage("bb02", "Busy", 9, NOW - 1),
                usage("cc03", "Stale", 30, NOW - WEEK - 1),
            ]
            .into_iter()
            .collect(),
        );
        let tracer = PathTracer::new(60_000, HOUR_MS);
        let doc = heatmap(&hops.render(), &tracer, WEEK, NOW);

        assert_eq!(doc["node_count"], 2);
        assert_eq!(doc["nodes"][0]["name"], "Busy");
        assert_eq!(doc["nodes"][1]["use_count"], 5);
        assert_eq!(doc["threshold_hours"], 168.0);
        assert_eq!(doc["path_count"], 0);
    }

    #[test]
    fn direct_links_are_undirected_and_recent() {
        let locations = locations();
        let mut graph = DirectLinkGraph::new();
        graph.record("aa", "bb", NOW - HOUR_MS);
        graph.record("bb", "cc", NOW - WEEK - 1);
        graph.record("aa", "dd", NOW);

        let doc = direct_links(&graph, &locations, WEEK, NOW);
        assert_eq!(doc["link_count"], 1);
        let link = &doc["links"][0];
        assert_eq!(link["from_pubkey"], "aa00000000a1");
        assert_eq!(link["to_name"], "Valley Contact");
        assert_eq!(link["count"], 1);

        assert_eq!(doc["node_count"], 2);
        for node in doc["nodes"].as_array().unwrap() {
            assert_eq!(node["link_count"], 1);
        }
    }

    #[test]
    fn nodemap_filters_on_last_advert() {
        let mut nodes = registry_nodes();
        nodes[0].last_advert_ms = Some(NOW - HOUR_MS);
        nodes[1].last_advert_ms = Some(NOW - 90 * 60 * 1_000);
        nodes[2].last_advert_ms = Some(NOW - 13 * HOUR_MS);
        nodes.push(NodeIdentity::new("dd00000000d4", "Nowhere"));

        let doc = nodemap(&nodes, 12 * HOUR_MS, NOW);
        assert_eq!(doc["node_count"], 2);
        assert_eq!(doc["nodes"][0]["name"], "Peak");
        assert_eq!(doc["nodes"][1]["name"], "Valley");
        assert_eq!(doc["nodes"][1]["age_hours"], 1.5);
        assert_eq!(doc["type_counts"]["repeater"], 1);
        assert_eq!(doc["type_counts"]["unknown"], 1);
    }

    #[test]
    fn direct_link_snapshot_counts_every_direction() {
        let locations = locations();
        let mut graph = DirectLinkGraph::new();
        graph.record("aa", "bb", 10);
        graph.record("aa", "cc", 20);

        let input = direct_links_snapshot(&graph, &locations);
        assert_eq!(input.nodes.len(), 3);
        let peak = input.nodes.iter().find(|n| n.name == "Peak").unwrap();
        assert_eq!(peak.link_count, Some(2));
        assert_eq!(peak.last_seen, Some(20));
        assert_eq!(input.extra["links"].as_array().unwrap().len(), 4);
        assert!(input.extra["threshold_hours"].is_null());
    }
}
