//! Time-windowed map.

use std::{
    collections::{HashMap, VecDeque, hash_map::Entry},
    hash::Hash,
};

struct Slot<V> {
    inserted_ms: u64,
    value: V,
}

/// Map whose entries expire a fixed window after insertion.
///
/// Expiry is explicit: [`WindowedMap::prune`] pops expired keys off an
/// insertion-ordered queue, so pruning is amortized O(1) per entry. Lookups
/// ignore expired entries that have not been pruned yet.
pub struct WindowedMap<K, V> {
    window_ms: u64,
    slots: HashMap<K, Slot<V>>,
    order: VecDeque<(u64, K)>,
}

impl<K: Eq + Hash + Clone, V> WindowedMap<K, V> {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            slots: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    fn is_expired(window_ms: u64, inserted_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(inserted_ms) > window_ms
    }

    /// Live value for `key`, inserting `f()` when absent or expired.
    /// The flag is `true` when a new entry was created.
    pub fn get_or_insert_with(
        &mut self,
        key: K,
        now_ms: u64,
        f: impl FnOnce() -> V,
    ) -> (&mut V, bool) {
        let window_ms = self.window_ms;
        match self.slots.entry(key) {
            Entry::Occupied(occupied) => {
                let key = occupied.key().clone();
                let slot = occupied.into_mut();
                if Self::is_expired(window_ms, slot.inserted_ms, now_ms) {
                    *slot = Slot {
                        inserted_ms: now_ms,
                        value: f(),
                    };
                    // The stale queue entry no longer matches and is skipped by prune.
                    self.order.push_back((now_ms, key));
                    (&mut slot.value, true)
                } else {
                    (&mut slot.value, false)
                }
            },
            Entry::Vacant(vacant) => {
                self.order.push_back((now_ms, vacant.key().clone()));
                let slot = vacant.insert(Slot {
                    inserted_ms: now_ms,
                    value: f(),
                });
                (&mut slot.value, true)
            },
        }
    }

    /// Insert or replace, restarting the entry's window.
    pub fn insert(&mut self, key: K, value: V, now_ms: u64) {
        self.order.push_back((now_ms, key.clone()));
        self.slots.insert(key, Slot {
            inserted_ms: now_ms,
            value,
        });
    }

    pub fn get(&self, key: &K, now_ms: u64) -> Option<&V> {
        self.slots
            .get(key)
            .filter(|slot| !Self::is_expired(self.window_ms, slot.inserted_ms, now_ms))
            .map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, key: &K, now_ms: u64) -> Option<&mut V> {
        let window_ms = self.window_ms;
        self.slots
            .get_mut(key)
            .filter(|slot| !Self::is_expired(window_ms, slot.inserted_ms, now_ms))
            .map(|slot| &mut slot.value)
    }

    /// When `key` was (re)inserted, if it is still live.
    pub fn inserted_at(&self, key: &K, now_ms: u64) -> Option<u64> {
        self.slots
            .get(key)
            .map(|slot| slot.inserted_ms)
            .filter(|inserted| !Self::is_expired(self.window_ms, *inserted, now_ms))
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.slots.remove(key).map(|slot| slot.value)
    }

    /// Live values, in no particular order.
    pub fn values(&self, now_ms: u64) -> impl Iterator<Item = &V> {
        let window_ms = self.window_ms;
        self.slots
            .values()
            .filter(move |slot| !Self::is_expired(window_ms, slot.inserted_ms, now_ms))
            .map(|slot| &slot.value)
    }

    /// Drop every entry older than the window. Returns how many went.
    pub fn prune(&mut self, now_ms: u64) -> usize {
        let mut removed = 0;
        while let Some((inserted_ms, _)) = self.order.front() {
            if !Self::is_expired(self.window_ms, *inserted_ms, now_ms) {
                break;
            }
            let Some((inserted_ms, key)) = self.order.pop_front() else {
                break;
            };
            let current = self
                .slots
                .get(&key)
                .is_some_and(|slot| slot.inserted_ms == inserted_ms);
            if current {
                self.slots.remove(&key);
                removed += 1;
            }
        }
        removed
    }

    /// Entries held, including expired ones not yet pruned.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
