//! TTL pruning.

use std::collections::BTreeMap;

/// Entries that age out of a persisted collection.
pub trait Expire {
    /// Drop whatever is older than `cutoff_ms`. Returns `true` when the
    /// entry as a whole has expired and should be removed.
    fn expire(&mut self, cutoff_ms: u64) -> bool;
}

/// Bare epoch-millisecond timestamps.
impl Expire for u64 {
    fn expire(&mut self, cutoff_ms: u64) -> bool {
        *self < cutoff_ms
    }
}

/// Nested maps expire entry by entry and vanish once empty.
impl<V: Expire> Expire for BTreeMap<String, V> {
    fn expire(&mut self, cutoff_ms: u64) -> bool {
        prune_map(self, cutoff_ms);
        self.is_empty()
    }
}

/// Remove expired entries in place. Returns how many top-level entries went.
pub fn prune_map<V: Expire>(map: &mut BTreeMap<String, V>, cutoff_ms: u64) -> usize {
    let before = map.len();
    map.retain(|_, entry| !entry.expire(cutoff_ms));
    before - map.len()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_older_than_cutoff_go() {
        let mut map = BTreeMap::from([("old".to_string(), 5u64), ("new".to_string(), 15u64)]);
        assert_eq!(prune_map(&mut map, 10), 1);
        assert!(map.contains_key("new"));
    }

    #[test]
    fn nested_maps_drop_when_emptied() {
        let mut map: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::from([
            (
                "a".to_string(),
                BTreeMap::from([("b".to_string(), 5), ("c".to_string(), 20)]),
            ),
            ("d".to_string(), BTreeMap::from([("e".to_string(), 1)])),
        ]);
        assert_eq!(prune_map(&mut map, 10), 1);
        assert_eq!(map["a"].len(), 1);
        assert!(!map.contains_key("d"));
    }
}
