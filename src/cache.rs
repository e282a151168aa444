//! Bounded keyed caches for entries and clusters (§4.H).
//!
//! Keys are recency-ordered in a `VecDeque` alongside the backing `HashMap`; eviction walks
//! from the back (least recently touched) forward, skipping any key with a nonzero pin count.
//! A pin keeps a cluster alive while its blobs are being iterated (§9) without copying bytes
//! out of the cache.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use log::trace;

/// How a [`Cache`] behaves when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Evict the least-recently-touched unpinned entry.
    Lru,
    /// Capacity 0: `put` is a no-op, `get` always misses.
    NoCache,
    /// No eviction; the cache grows without bound.
    Unbounded,
}

struct Slot<V> {
    value: V,
    pins: u32,
}

/// A bounded `K -> V` cache with LRU eviction and pinning.
pub struct Cache<K, V> {
    capacity: usize,
    policy: EvictionPolicy,
    slots: HashMap<K, Slot<V>>,
    /// Recency order, most-recently-touched at the back. May contain stale entries for keys
    /// already removed from `slots`; `touch` and eviction both tolerate that.
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone + std::fmt::Debug, V> Cache<K, V> {
    /// `capacity == 0` means "disabled" regardless of `policy` (§4.I): a `Lru` or `Unbounded`
    /// cache asked for zero capacity would otherwise still accept `put`s (`Lru`'s own eviction
    /// loop only fires for `capacity > 0`, and `Unbounded` never evicts at all), so it is forced
    /// to `NoCache` here rather than left to whichever eviction policy the caller passed.
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Cache<K, V> {
        let policy = if capacity == 0 { EvictionPolicy::NoCache } else { policy };
        Cache {
            capacity,
            policy,
            slots: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.slots.contains_key(key) {
            self.touch(key);
        }
        self.slots.get(key).map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if self.slots.contains_key(key) {
            self.touch(key);
        }
        self.slots.get_mut(key).map(|slot| &mut slot.value)
    }

    pub fn put(&mut self, key: K, value: V) {
        if self.policy == EvictionPolicy::NoCache {
            return;
        }
        if !self.slots.contains_key(&key) {
            self.evict_if_needed();
        }
        self.touch(&key);
        self.slots.insert(key, Slot { value, pins: 0 });
    }

    pub fn invalidate(&mut self, key: &K) {
        self.slots.remove(key);
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Marks `key` as in-use; pinned entries are never evicted. Returns `false` if the key
    /// isn't currently cached.
    pub fn pin(&mut self, key: &K) -> bool {
        match self.slots.get_mut(key) {
            Some(slot) => {
                slot.pins += 1;
                true
            }
            None => false,
        }
    }

    /// Releases one pin taken by [`Cache::pin`]. No-op if the key isn't cached.
    pub fn unpin(&mut self, key: &K) {
        if let Some(slot) = self.slots.get_mut(key) {
            slot.pins = slot.pins.saturating_sub(1);
        }
    }

    fn touch(&mut self, key: &K) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.clone());
    }

    fn evict_if_needed(&mut self) {
        if self.policy != EvictionPolicy::Lru || self.capacity == 0 {
            return;
        }
        while self.slots.len() >= self.capacity {
            let victim = self
                .order
                .iter()
                .position(|k| self.slots.get(k).map(|s| s.pins == 0).unwrap_or(false));
            match victim {
                Some(pos) => {
                    let key = self.order.remove(pos).expect("position just found");
                    trace!("cache eviction: {:?}", key);
                    self.slots.remove(&key);
                }
                None => break, // everything left is pinned; let the cache grow past capacity
            }
        }
    }
}
