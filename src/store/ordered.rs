//! Concurrent map with an intrusive ordering chain and bounded capacity.
//!
//! [`OrderedConcurrentMap`] is the storage engine of the cache: a sharded
//! hash index from [`Key`] to chain [`Node`]s, cross-cut by the doubly
//! linked ring in [`chain`](crate::ds::chain), with eviction driven by a
//! pluggable [`EvictionPolicy`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ OrderedConcurrentMap                                                │
//! │                                                                     │
//! │   shards: [RwLock<FxHashMap<Key, Arc<Node>>>; N]                    │
//! │   ┌─────────┬─────────┬─────────┬─────────┐                         │
//! │   │ shard 0 │ shard 1 │ shard 2 │ shard 3 │  key → node             │
//! │   └────┬────┴────┬────┴────┬────┴────┬────┘                         │
//! │        │         │         │         │                              │
//! │        ▼         ▼         ▼         ▼                              │
//! │   ┌──────────────────────────────────────────────┐                  │
//! │   │ chain: sentinel ◄──► node ◄──► node ◄──► …   │  insertion /     │
//! │   │        (one global mutex, O(1) splices)      │  recency order   │
//! │   └──────────────────────────────────────────────┘                  │
//! │                                                                     │
//! │   length, memory_used: atomics (eventually consistent, clamped)     │
//! │   capacity, memory_capacity: atomics (settable, evict eagerly)      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! - Hash operations take one shard lock for the duration of a map probe.
//! - Chain operations take the single chain mutex for an O(1) splice.
//! - A node's element is swapped whole; conditional swaps compare by
//!   `Arc` identity, so value updates commute with structural operations.
//! - A shard lock is never held across a chain operation, and the chain
//!   mutex is never held across a shard probe.
//!
//! Removal uses an identity check on the node (not value equality) so two
//! nodes carrying equal elements cannot alias during an eviction race.
//!
//! ## Eviction
//!
//! The eviction loop runs after any operation that grows the map and
//! keeps discarding the chain head (subject to the policy's verdict)
//! until both the item count and the byte footprint are within bounds.
//! An element larger than the whole memory budget is itself evicted once
//! it becomes the head; the map never holds it in steady state.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::ds::chain::{Chain, Node};
use crate::element::Element;
use crate::key::Key;
use crate::policy::EvictionPolicy;

/// Default shard count, sized for typical daemon thread counts.
pub const DEFAULT_SHARDS: usize = 16;

/// Notification hook invoked after an entry has been evicted.
pub trait EvictionListener: Send + Sync {
    /// Called with the evicted key and element, after the entry has left
    /// the map and before the eviction loop continues.
    fn on_eviction(&self, key: &Key, element: &Element);
}

/// The default listener: does nothing.
#[derive(Debug, Default)]
pub struct NoopListener;

impl EvictionListener for NoopListener {
    fn on_eviction(&self, _key: &Key, _element: &Element) {}
}

/// Sharded concurrent map with insertion/recency ordering and dual
/// count/byte capacity bounds.
pub struct OrderedConcurrentMap {
    shards: Box<[RwLock<FxHashMap<Key, Arc<Node>>>]>,
    chain: Chain,
    policy: EvictionPolicy,
    capacity: AtomicUsize,
    memory_capacity: AtomicU64,
    length: AtomicI64,
    memory_used: AtomicI64,
    listener: Box<dyn EvictionListener>,
}

impl OrderedConcurrentMap {
    /// Creates a map with the default shard count and a no-op eviction
    /// listener.
    pub fn new(policy: EvictionPolicy, max_items: usize, max_bytes: u64) -> Self {
        Self::with_shards(policy, max_items, max_bytes, DEFAULT_SHARDS)
    }

    /// Creates a map with an explicit shard count (clamped to at least 1).
    pub fn with_shards(
        policy: EvictionPolicy,
        max_items: usize,
        max_bytes: u64,
        shards: usize,
    ) -> Self {
        Self::with_listener(policy, max_items, max_bytes, shards, Box::new(NoopListener))
    }

    /// Creates a map with an eviction listener.
    pub fn with_listener(
        policy: EvictionPolicy,
        max_items: usize,
        max_bytes: u64,
        shards: usize,
        listener: Box<dyn EvictionListener>,
    ) -> Self {
        let shard_count = shards.max(1);
        let mut shard_vec = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shard_vec.push(RwLock::new(FxHashMap::default()));
        }
        Self {
            shards: shard_vec.into_boxed_slice(),
            chain: Chain::new(),
            policy,
            capacity: AtomicUsize::new(max_items),
            memory_capacity: AtomicU64::new(max_bytes),
            length: AtomicI64::new(0),
            memory_used: AtomicI64::new(0),
            listener,
        }
    }

    /// Returns the number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn shard_index(&self, key: &Key) -> usize {
        (key.precomputed_hash() as usize) % self.shards.len()
    }

    // -----------------------------------------------------------------------
    // Capacity
    // -----------------------------------------------------------------------

    /// Returns the maximum item count.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Returns the maximum byte footprint.
    pub fn memory_capacity(&self) -> u64 {
        self.memory_capacity.load(Ordering::Relaxed)
    }

    /// Sets the maximum item count and eagerly evicts down to it.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
        self.evict();
    }

    /// Sets the maximum byte footprint and eagerly evicts down to it.
    pub fn set_memory_capacity(&self, memory_capacity: u64) {
        self.memory_capacity.store(memory_capacity, Ordering::Relaxed);
        self.evict();
    }

    /// Returns the current item count, clamped to zero.
    ///
    /// The counter is eventually consistent while inserts and removes are
    /// racing, but is never reported negative.
    pub fn size(&self) -> usize {
        let length = self.length.load(Ordering::Relaxed);
        usize::try_from(length).unwrap_or(0)
    }

    /// Returns `true` if the map currently reports no entries.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns the byte footprint (sum of payload sizes), clamped to zero.
    pub fn memory_used(&self) -> u64 {
        let used = self.memory_used.load(Ordering::Relaxed);
        u64::try_from(used).unwrap_or(0)
    }

    fn is_overflow(&self) -> bool {
        self.size() > self.capacity() || self.memory_used() > self.memory_capacity()
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Fetches the element for `key`, applying the policy's access hook on
    /// a hit.
    pub fn get(&self, key: &Key) -> Option<Arc<Element>> {
        let node = self.shards[self.shard_index(key)].read().get(key).cloned()?;
        self.policy.on_access(&self.chain, &node);
        Some(node.value())
    }

    /// Returns `true` if `key` is present in the hash index.
    pub fn contains_key(&self, key: &Key) -> bool {
        self.shards[self.shard_index(key)].read().contains_key(key)
    }

    /// Returns a point-in-time snapshot of all keys.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys = Vec::with_capacity(self.size());
        for shard in self.shards.iter() {
            keys.extend(shard.read().keys().cloned());
        }
        keys
    }

    /// Returns a point-in-time snapshot of all elements.
    pub fn values(&self) -> Vec<Arc<Element>> {
        let mut values = Vec::with_capacity(self.size());
        for shard in self.shards.iter() {
            values.extend(shard.read().values().map(|node| node.value()));
        }
        values
    }

    /// Returns a point-in-time snapshot of all entries.
    pub fn entries(&self) -> Vec<(Key, Arc<Element>)> {
        let mut entries = Vec::with_capacity(self.size());
        for shard in self.shards.iter() {
            entries.extend(
                shard
                    .read()
                    .iter()
                    .map(|(key, node)| (key.clone(), node.value())),
            );
        }
        entries
    }

    // -----------------------------------------------------------------------
    // Insertion & replacement
    // -----------------------------------------------------------------------

    /// Unconditional insert-or-replace. Returns the previous element.
    ///
    /// On insert the node is appended to the chain tail and the eviction
    /// loop runs. On replace the element is swapped in place and the node
    /// keeps its chain position; the eviction loop runs only if the byte
    /// footprint grew.
    pub fn put(&self, key: Key, value: Arc<Element>) -> Option<Arc<Element>> {
        let new_size = value.size() as i64;
        let node = Node::new(key.clone(), value.clone());
        let existing = self.insert_if_vacant(key, node.clone());

        match existing {
            None => {
                self.length.fetch_add(1, Ordering::Relaxed);
                self.memory_used.fetch_add(new_size, Ordering::Relaxed);
                self.chain.append_to_tail(&node);
                self.evict();
                None
            }
            Some(existing) => {
                self.policy.on_access(&self.chain, &existing);
                let old = existing.swap_value(value);
                let delta = new_size - old.size() as i64;
                self.memory_used.fetch_add(delta, Ordering::Relaxed);
                if delta > 0 {
                    self.evict();
                }
                Some(old)
            }
        }
    }

    /// Inserts only if `key` is absent. Returns the current element when
    /// the key was already present (no change is made).
    pub fn put_if_absent(&self, key: Key, value: Arc<Element>) -> Option<Arc<Element>> {
        let new_size = value.size() as i64;
        let node = Node::new(key.clone(), value);
        let existing = self.insert_if_vacant(key, node.clone());

        match existing {
            None => {
                self.length.fetch_add(1, Ordering::Relaxed);
                self.memory_used.fetch_add(new_size, Ordering::Relaxed);
                self.chain.append_to_tail(&node);
                self.evict();
                None
            }
            Some(existing) => {
                self.policy.on_access(&self.chain, &existing);
                Some(existing.value())
            }
        }
    }

    /// Swaps the element for a present key; absent keys are left alone.
    /// Returns the previous element.
    pub fn replace(&self, key: &Key, value: Arc<Element>) -> Option<Arc<Element>> {
        let new_size = value.size() as i64;
        let node = self.shards[self.shard_index(key)].read().get(key).cloned()?;

        let old = node.swap_value(value);
        let delta = new_size - old.size() as i64;
        self.memory_used.fetch_add(delta, Ordering::Relaxed);
        if delta > 0 {
            self.evict();
        }
        Some(old)
    }

    /// Conditional swap: replaces the element only if the current one is
    /// identically `expected`. Counters are updated only on success.
    pub fn replace_entry(&self, key: &Key, expected: &Arc<Element>, value: Arc<Element>) -> bool {
        let new_size = value.size() as i64;
        let Some(node) = self.shards[self.shard_index(key)].read().get(key).cloned() else {
            return false;
        };

        if node.cas_value(expected, value) {
            let delta = new_size - expected.size() as i64;
            self.memory_used.fetch_add(delta, Ordering::Relaxed);
            if delta > 0 {
                self.evict();
            }
            true
        } else {
            false
        }
    }

    fn insert_if_vacant(&self, key: Key, node: Arc<Node>) -> Option<Arc<Node>> {
        let mut shard = self.shards[self.shard_index(&key)].write();
        match shard.entry(key) {
            std::collections::hash_map::Entry::Occupied(entry) => Some(entry.get().clone()),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(node);
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Removes `key` unconditionally. Returns the removed element.
    pub fn remove(&self, key: &Key) -> Option<Arc<Element>> {
        let node = self.shards[self.shard_index(key)].write().remove(key)?;
        self.length.fetch_sub(1, Ordering::Relaxed);
        let value = node.value();
        self.memory_used
            .fetch_sub(value.size() as i64, Ordering::Relaxed);
        self.chain.remove(&node);
        Some(value)
    }

    /// Conditional removal: removes `key` only if its current element is
    /// identically `expected`.
    pub fn remove_entry(&self, key: &Key, expected: &Arc<Element>) -> bool {
        let Some(node) = self.shards[self.shard_index(key)].read().get(key).cloned() else {
            return false;
        };
        if !Arc::ptr_eq(&node.value(), expected) {
            return false;
        }
        if !self.remove_node_if_identical(key, &node) {
            return false;
        }

        self.length.fetch_sub(1, Ordering::Relaxed);
        self.memory_used
            .fetch_sub(node.value().size() as i64, Ordering::Relaxed);
        self.chain.remove(&node);
        true
    }

    /// Removes the hash-index entry for `key` only if it still maps to
    /// exactly `node`.
    fn remove_node_if_identical(&self, key: &Key, node: &Arc<Node>) -> bool {
        let mut shard = self.shards[self.shard_index(key)].write();
        match shard.get(key) {
            Some(current) if Arc::ptr_eq(current, node) => {
                shard.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Removes every entry, keeping the chain consistent.
    pub fn clear(&self) {
        for key in self.keys() {
            self.remove(&key);
        }
    }

    /// Clears the map. The cache calls this during shutdown.
    pub fn close(&self) {
        self.clear();
    }

    // -----------------------------------------------------------------------
    // Eviction
    // -----------------------------------------------------------------------

    /// Discards chain-head entries until the map is within both capacity
    /// bounds. Returns whether anything was evicted.
    fn evict(&self) -> bool {
        let mut evicted = false;
        while self.is_overflow() {
            let Some(node) = self.chain.eviction_candidate() else {
                return evicted;
            };
            if !self.policy.on_evict(&self.chain, &node) {
                continue;
            }
            // Another caller may have removed or replaced the entry since
            // we read the candidate; only the identity winner unlinks.
            if self.remove_node_if_identical(node.key(), &node) {
                self.length.fetch_sub(1, Ordering::Relaxed);
                let value = node.value();
                self.memory_used
                    .fetch_sub(value.size() as i64, Ordering::Relaxed);
                self.chain.remove(&node);
                tracing::debug!(key = %node.key(), size = value.size(), "evicted");
                self.listener.on_eviction(node.key(), &value);
                evicted = true;
            }
        }
        evicted
    }

    /// Keys in chain order, oldest first. Test introspection.
    #[cfg(any(test, debug_assertions))]
    pub(crate) fn keys_in_order(&self) -> Vec<Key> {
        self.chain.keys_in_order()
    }
}

impl std::fmt::Debug for OrderedConcurrentMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedConcurrentMap")
            .field("policy", &self.policy)
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .field("memory_used", &self.memory_used())
            .field("memory_capacity", &self.memory_capacity())
            .field("shards", &self.shards.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn element(key: &str, data: &str) -> Arc<Element> {
        Arc::new(Element::with_data(
            Key::from(key),
            0,
            0,
            Bytes::copy_from_slice(data.as_bytes()),
        ))
    }

    fn map(policy: EvictionPolicy, max_items: usize, max_bytes: u64) -> OrderedConcurrentMap {
        OrderedConcurrentMap::with_shards(policy, max_items, max_bytes, 4)
    }

    fn order(map: &OrderedConcurrentMap) -> Vec<String> {
        map.keys_in_order()
            .into_iter()
            .map(|k| k.to_string())
            .collect()
    }

    #[test]
    fn put_and_get_round_trip() {
        let map = map(EvictionPolicy::Fifo, 10, 1_000);
        assert!(map.put(Key::from("a"), element("a", "1")).is_none());

        let fetched = map.get(&Key::from("a")).unwrap();
        assert_eq!(&fetched.data()[..], b"1");
        assert_eq!(map.size(), 1);
        assert_eq!(map.memory_used(), 1);
    }

    #[test]
    fn put_replace_keeps_chain_position_and_adjusts_memory() {
        let map = map(EvictionPolicy::Fifo, 10, 1_000);
        map.put(Key::from("a"), element("a", "1"));
        map.put(Key::from("b"), element("b", "22"));

        let old = map.put(Key::from("a"), element("a", "333")).unwrap();
        assert_eq!(&old.data()[..], b"1");
        assert_eq!(order(&map), vec!["a", "b"]);
        assert_eq!(map.size(), 2);
        assert_eq!(map.memory_used(), 5);
    }

    #[test]
    fn put_if_absent_preserves_existing() {
        let map = map(EvictionPolicy::Fifo, 10, 1_000);
        assert!(map.put_if_absent(Key::from("a"), element("a", "x")).is_none());

        let existing = map.put_if_absent(Key::from("a"), element("a", "y")).unwrap();
        assert_eq!(&existing.data()[..], b"x");
        assert_eq!(&map.get(&Key::from("a")).unwrap().data()[..], b"x");
        assert_eq!(map.memory_used(), 1);
    }

    #[test]
    fn remove_returns_previous_and_updates_counters() {
        let map = map(EvictionPolicy::Fifo, 10, 1_000);
        map.put(Key::from("a"), element("a", "abc"));

        let removed = map.remove(&Key::from("a")).unwrap();
        assert_eq!(&removed.data()[..], b"abc");
        assert_eq!(map.size(), 0);
        assert_eq!(map.memory_used(), 0);
        assert!(map.remove(&Key::from("a")).is_none());
        assert!(order(&map).is_empty());
    }

    #[test]
    fn remove_entry_requires_identity() {
        let map = map(EvictionPolicy::Fifo, 10, 1_000);
        map.put(Key::from("a"), element("a", "v"));

        let equal_but_distinct = element("a", "v");
        assert!(!map.remove_entry(&Key::from("a"), &equal_but_distinct));
        assert!(map.contains_key(&Key::from("a")));

        let current = map.get(&Key::from("a")).unwrap();
        assert!(map.remove_entry(&Key::from("a"), &current));
        assert!(!map.contains_key(&Key::from("a")));
    }

    #[test]
    fn replace_only_touches_present_keys() {
        let map = map(EvictionPolicy::Fifo, 10, 1_000);
        assert!(map.replace(&Key::from("a"), element("a", "v")).is_none());
        assert_eq!(map.size(), 0);

        map.put(Key::from("a"), element("a", "old"));
        let old = map.replace(&Key::from("a"), element("a", "new!")).unwrap();
        assert_eq!(&old.data()[..], b"old");
        assert_eq!(map.memory_used(), 4);
    }

    #[test]
    fn replace_entry_is_a_cas() {
        let map = map(EvictionPolicy::Fifo, 10, 1_000);
        map.put(Key::from("a"), element("a", "one"));
        let current = map.get(&Key::from("a")).unwrap();

        let stale = element("a", "one");
        assert!(!map.replace_entry(&Key::from("a"), &stale, element("a", "x")));
        assert!(map.replace_entry(&Key::from("a"), &current, element("a", "two")));
        assert!(!map.replace_entry(&Key::from("a"), &current, element("a", "y")));
        assert_eq!(&map.get(&Key::from("a")).unwrap().data()[..], b"two");
        assert_eq!(map.memory_used(), 3);
    }

    #[test]
    fn fifo_evicts_in_insertion_order() {
        let map = map(EvictionPolicy::Fifo, 2, 1_000);
        map.put(Key::from("k1"), element("k1", "a"));
        map.put(Key::from("k2"), element("k2", "b"));
        map.get(&Key::from("k1"));
        map.put(Key::from("k3"), element("k3", "c"));

        assert_eq!(map.size(), 2);
        assert!(map.get(&Key::from("k1")).is_none());
        assert!(map.get(&Key::from("k2")).is_some());
        assert!(map.get(&Key::from("k3")).is_some());
    }

    #[test]
    fn lru_access_protects_from_eviction() {
        let map = map(EvictionPolicy::Lru, 2, 1_000);
        map.put(Key::from("k1"), element("k1", "a"));
        map.put(Key::from("k2"), element("k2", "b"));
        map.get(&Key::from("k1"));
        map.put(Key::from("k3"), element("k3", "c"));

        assert!(map.get(&Key::from("k2")).is_none());
        assert!(map.get(&Key::from("k1")).is_some());
        assert!(map.get(&Key::from("k3")).is_some());
    }

    #[test]
    fn second_chance_saves_accessed_entry_for_one_pass() {
        let map = map(EvictionPolicy::SecondChance, 2, 1_000);
        map.put(Key::from("k1"), element("k1", "a"));
        map.put(Key::from("k2"), element("k2", "b"));
        map.get(&Key::from("k1"));
        map.put(Key::from("k3"), element("k3", "c"));

        // k1 was marked, so the scan recycled it and evicted k2 instead.
        assert!(map.get(&Key::from("k2")).is_none());
        assert!(map.get(&Key::from("k1")).is_some());
        assert!(map.get(&Key::from("k3")).is_some());
    }

    #[test]
    fn byte_capacity_drives_eviction() {
        let map = map(EvictionPolicy::Fifo, 100, 6);
        map.put(Key::from("a"), element("a", "xxx"));
        map.put(Key::from("b"), element("b", "yyy"));
        assert_eq!(map.memory_used(), 6);

        map.put(Key::from("c"), element("c", "zz"));
        assert!(map.memory_used() <= 6);
        assert!(map.get(&Key::from("a")).is_none());
    }

    #[test]
    fn oversized_element_does_not_linger() {
        let map = map(EvictionPolicy::Fifo, 100, 4);
        map.put(Key::from("big"), element("big", "xxxxxxxx"));
        assert!(map.memory_used() <= 4);
        assert_eq!(map.size(), 0);
    }

    #[test]
    fn set_capacity_shrinks_eagerly() {
        let map = map(EvictionPolicy::Fifo, 10, 1_000);
        for i in 0..6 {
            let name = format!("k{i}");
            map.put(Key::from(name.as_str()), element(&name, "v"));
        }
        assert_eq!(map.size(), 6);

        map.set_capacity(3);
        assert_eq!(map.size(), 3);
        assert!(map.get(&Key::from("k0")).is_none());
        assert!(map.get(&Key::from("k5")).is_some());
    }

    #[test]
    fn snapshots_reflect_contents() {
        let map = map(EvictionPolicy::Fifo, 10, 1_000);
        map.put(Key::from("a"), element("a", "1"));
        map.put(Key::from("b"), element("b", "2"));

        let mut keys: Vec<_> = map.keys().iter().map(|k| k.to_string()).collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(map.values().len(), 2);
        assert_eq!(map.entries().len(), 2);
    }

    #[test]
    fn clear_empties_map_and_chain() {
        let map = map(EvictionPolicy::Lru, 10, 1_000);
        for i in 0..5 {
            let name = format!("k{i}");
            map.put(Key::from(name.as_str()), element(&name, "v"));
        }

        map.clear();
        assert_eq!(map.size(), 0);
        assert_eq!(map.memory_used(), 0);
        assert!(order(&map).is_empty());

        // Still usable after clear.
        map.put(Key::from("x"), element("x", "1"));
        assert_eq!(map.size(), 1);
    }

    #[test]
    fn eviction_listener_sees_evicted_entries() {
        use parking_lot::Mutex;

        #[derive(Default)]
        struct Recorder(Mutex<Vec<String>>);
        impl EvictionListener for Arc<Recorder> {
            fn on_eviction(&self, key: &Key, _element: &Element) {
                self.0.lock().push(key.to_string());
            }
        }

        let recorder = Arc::new(Recorder::default());
        let map = OrderedConcurrentMap::with_listener(
            EvictionPolicy::Fifo,
            1,
            1_000,
            1,
            Box::new(Arc::clone(&recorder)),
        );
        map.put(Key::from("a"), element("a", "1"));
        map.put(Key::from("b"), element("b", "2"));

        assert_eq!(recorder.0.lock().as_slice(), &["a".to_string()]);
    }

    #[test]
    fn concurrent_mixed_workload_keeps_counters_sane() {
        use std::thread;

        let map = Arc::new(OrderedConcurrentMap::with_shards(
            EvictionPolicy::Lru,
            128,
            1 << 20,
            8,
        ));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..500 {
                        let name = format!("k{t}:{i}");
                        let key = Key::from(name.as_str());
                        map.put(key.clone(), element(&name, "payload"));
                        map.get(&key);
                        if i % 3 == 0 {
                            map.remove(&key);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(map.size() <= 128);
        assert!(map.memory_used() <= 1 << 20);
        assert_eq!(map.keys().len(), map.size());
        assert_eq!(map.keys_in_order().len(), map.size());
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Put(u8, Vec<u8>),
        Remove(u8),
        Get(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<u8>(), prop::collection::vec(any::<u8>(), 0..16))
                .prop_map(|(k, v)| Op::Put(k, v)),
            any::<u8>().prop_map(Op::Remove),
            any::<u8>().prop_map(Op::Get),
        ]
    }

    proptest! {
        /// Property: after any op sequence, reported size matches the hash
        /// index, memory matches the sum of payload sizes, and both bounds
        /// hold.
        #[cfg_attr(miri, ignore)]
        #[test]
        fn prop_accounting_holds(ops in prop::collection::vec(op_strategy(), 1..200)) {
            let map = OrderedConcurrentMap::with_shards(EvictionPolicy::Fifo, 16, 256, 4);

            for op in ops {
                match op {
                    Op::Put(k, v) => {
                        let name = format!("k{k}");
                        let key = Key::from(name.as_str());
                        let element = Arc::new(Element::with_data(
                            key.clone(), 0, 0, Bytes::from(v),
                        ));
                        map.put(key, element);
                    }
                    Op::Remove(k) => {
                        map.remove(&Key::from(format!("k{k}").as_str()));
                    }
                    Op::Get(k) => {
                        map.get(&Key::from(format!("k{k}").as_str()));
                    }
                }

                prop_assert!(map.size() <= 16);
                prop_assert!(map.memory_used() <= 256);

                let entries = map.entries();
                prop_assert_eq!(entries.len(), map.size());
                let total: u64 = entries.iter().map(|(_, e)| e.size() as u64).sum();
                prop_assert_eq!(total, map.memory_used());
            }
        }
    }
}
