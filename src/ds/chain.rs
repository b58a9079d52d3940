//! Intrusive ordering chain cross-cutting the concurrent map.
//!
//! Every map entry owns a [`Node`] that is simultaneously a hash-index
//! value and a link in a doubly-linked ring anchored by a single sentinel.
//! The ring's head (`sentinel.next`) is the eviction candidate; its tail
//! (`sentinel.prev`) is the most recently appended node.
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────────────────────────────────────┐
//!              ▼                                              │
//!        ┌──────────┐      ┌────────┐      ┌────────┐      ┌────────┐
//!        │ sentinel │─next►│ node A │─next►│ node B │─next►│ node C │
//!        │          │◄prev─│ oldest │◄prev─│        │◄prev─│ newest │
//!        └──────────┘      └────────┘      └────────┘      └────────┘
//!              ▲                                              │
//!              └──────────────────────────────────────────────┘
//!
//!   append_to_tail: splice before the sentinel
//!   eviction_candidate: sentinel.next (or none when the ring is empty)
//! ```
//!
//! ## Locking
//!
//! One global mutex serializes every structural mutation (link, unlink,
//! move). Critical sections are constant-time pointer swaps, so contention
//! stays low even under LRU, which moves a node on every hit. The `linked`
//! flag is the only link state readable outside the mutex: it is published
//! with release ordering when an append completes, which lets
//! [`Chain::remove`] spin-wait (lock, yield, retry) for a concurrent
//! append instead of blocking inside the critical section.
//!
//! A node is removed from the chain exactly once, by whichever caller won
//! the hash-index removal for it. `move_to_tail` is idempotent and no-ops
//! on nodes that are not currently linked.
//!
//! ## Value slot
//!
//! The node's element is swapped whole under a per-node mutex; conditional
//! swaps compare by `Arc` identity. Readers always observe a complete
//! element, never a torn write.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::element::Element;
use crate::key::Key;

/// Link fields of a node. Guarded by the owning [`Chain`]'s mutex.
struct Links {
    prev: Option<Arc<Node>>,
    next: Option<Arc<Node>>,
}

/// A map entry: element holder plus intrusive chain links.
pub(crate) struct Node {
    key: Key,
    value: Mutex<Arc<Element>>,
    marked: AtomicBool,
    linked: AtomicBool,
    links: UnsafeCell<Links>,
}

// SAFETY:
// `links` is only read or written while holding the owning chain's mutex
// (or during `Chain::new`/`Drop`, which have exclusive access). All other
// fields are immutable, atomic, or behind their own mutex.
unsafe impl Send for Node {}
unsafe impl Sync for Node {}

impl Node {
    /// Creates an unlinked node holding `value`.
    pub(crate) fn new(key: Key, value: Arc<Element>) -> Arc<Node> {
        Arc::new(Node {
            key,
            value: Mutex::new(value),
            marked: AtomicBool::new(false),
            linked: AtomicBool::new(false),
            links: UnsafeCell::new(Links {
                prev: None,
                next: None,
            }),
        })
    }

    /// Returns the node's key.
    #[inline]
    pub(crate) fn key(&self) -> &Key {
        &self.key
    }

    /// Returns the current element.
    #[inline]
    pub(crate) fn value(&self) -> Arc<Element> {
        self.value.lock().clone()
    }

    /// Swaps in a new element unconditionally, returning the old one.
    #[inline]
    pub(crate) fn swap_value(&self, value: Arc<Element>) -> Arc<Element> {
        std::mem::replace(&mut *self.value.lock(), value)
    }

    /// Swaps in a new element only if the current one is identically
    /// `expected` (pointer identity, not value equality).
    pub(crate) fn cas_value(&self, expected: &Arc<Element>, value: Arc<Element>) -> bool {
        let mut slot = self.value.lock();
        if Arc::ptr_eq(&slot, expected) {
            *slot = value;
            true
        } else {
            false
        }
    }

    /// Second-chance reference bit.
    #[inline]
    pub(crate) fn is_marked(&self) -> bool {
        self.marked.load(Ordering::Relaxed)
    }

    /// Sets or clears the second-chance reference bit.
    #[inline]
    pub(crate) fn set_marked(&self, marked: bool) {
        self.marked.store(marked, Ordering::Relaxed);
    }

    /// Returns `true` once `append_to_tail` has published this node's
    /// linkage, and `false` again after it is spliced out.
    #[inline]
    pub(crate) fn is_linked(&self) -> bool {
        self.linked.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("key", &self.key.to_string())
            .field("marked", &self.is_marked())
            .field("linked", &self.is_linked())
            .finish()
    }
}

/// The ordering ring: a single sentinel plus the global chain mutex.
pub(crate) struct Chain {
    lock: Mutex<()>,
    sentinel: Arc<Node>,
}

impl Chain {
    /// Creates an empty ring (sentinel linked to itself).
    pub(crate) fn new() -> Self {
        let sentinel = Node::new(
            Key::new(bytes::Bytes::new()),
            Arc::new(Element::new(Key::new(bytes::Bytes::new()), 0, 0)),
        );
        // SAFETY: no other thread can observe the node yet.
        unsafe {
            let links = &mut *sentinel.links.get();
            links.prev = Some(sentinel.clone());
            links.next = Some(sentinel.clone());
        }
        sentinel.linked.store(true, Ordering::Release);
        Self {
            lock: Mutex::new(()),
            sentinel,
        }
    }

    /// Appends `node` at the tail (most-recent end) of the ring.
    ///
    /// `node.next` is written first so that a concurrent observer never
    /// sees the node linked with a missing successor.
    pub(crate) fn append_to_tail(&self, node: &Arc<Node>) {
        let _guard = self.lock.lock();
        // SAFETY: chain mutex held. Accesses are statement-scoped because
        // the old tail is the sentinel itself when the ring is empty.
        unsafe {
            (*node.links.get()).next = Some(self.sentinel.clone());

            let tail = (*self.sentinel.links.get())
                .prev
                .clone()
                .expect("chain ring is closed from construction to drop");
            (*self.sentinel.links.get()).prev = Some(node.clone());
            (*tail.links.get()).next = Some(node.clone());
            (*node.links.get()).prev = Some(tail);
        }
        node.linked.store(true, Ordering::Release);
    }

    /// Splices `node` out of the ring.
    ///
    /// If the inserting thread has not yet published the node's linkage,
    /// spins (lock, yield, retry) until it has. Must be called at most
    /// once per node, by the caller that won the hash-index removal.
    pub(crate) fn remove(&self, node: &Arc<Node>) {
        let mut waited = false;
        loop {
            if node.is_linked() {
                let guard = self.lock.lock();
                if node.is_linked() {
                    // SAFETY: chain mutex held.
                    unsafe { self.splice_out(node) };
                    node.linked.store(false, Ordering::Release);
                    return;
                }
                drop(guard);
            }
            if !waited {
                waited = true;
                tracing::trace!(key = %node.key(), "waiting for concurrent append");
            }
            std::thread::yield_now();
        }
    }

    /// Moves `node` to the tail. No-op when the node is already the tail
    /// or not currently linked; idempotent under concurrent requests.
    pub(crate) fn move_to_tail(&self, node: &Arc<Node>) {
        if !node.is_linked() {
            return;
        }
        let _guard = self.lock.lock();
        if !node.is_linked() {
            return;
        }
        // SAFETY: chain mutex held. Accesses are statement-scoped because
        // the old tail is the sentinel itself when the splice empties the
        // ring.
        unsafe {
            let next_is_sentinel = {
                let links = &*node.links.get();
                matches!(&links.next, Some(next) if Arc::ptr_eq(next, &self.sentinel))
            };
            if next_is_sentinel {
                return;
            }

            self.splice_out(node);

            (*node.links.get()).next = Some(self.sentinel.clone());
            let tail = (*self.sentinel.links.get())
                .prev
                .clone()
                .expect("chain ring is closed from construction to drop");
            (*self.sentinel.links.get()).prev = Some(node.clone());
            (*tail.links.get()).next = Some(node.clone());
            (*node.links.get()).prev = Some(tail);
        }
    }

    /// Returns the oldest node (`sentinel.next`), or `None` when the ring
    /// is empty.
    pub(crate) fn eviction_candidate(&self) -> Option<Arc<Node>> {
        let _guard = self.lock.lock();
        // SAFETY: chain mutex held.
        let first = unsafe { (*self.sentinel.links.get()).next.clone() };
        first.filter(|node| !Arc::ptr_eq(node, &self.sentinel))
    }

    /// Splices a linked node out of the ring. Caller holds the chain mutex.
    unsafe fn splice_out(&self, node: &Arc<Node>) {
        let (prev, next) = {
            let links = &mut *node.links.get();
            (links.prev.take(), links.next.take())
        };
        debug_assert!(prev.is_some() && next.is_some());
        if let (Some(prev), Some(next)) = (prev, next) {
            (*prev.links.get()).next = Some(next.clone());
            (*next.links.get()).prev = Some(prev);
        }
    }

    /// Keys in ring order, oldest first. Test and debug introspection.
    #[cfg(any(test, debug_assertions))]
    pub(crate) fn keys_in_order(&self) -> Vec<Key> {
        let _guard = self.lock.lock();
        let mut keys = Vec::new();
        // SAFETY: chain mutex held.
        unsafe {
            let mut current = (*self.sentinel.links.get()).next.clone();
            while let Some(node) = current {
                if Arc::ptr_eq(&node, &self.sentinel) {
                    break;
                }
                keys.push(node.key().clone());
                current = (*node.links.get()).next.clone();
            }
        }
        keys
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        // Break every Arc cycle in the ring (including the sentinel's
        // self-links) so all nodes deallocate. Nodes are cleared one at a
        // time while walking, which keeps the drop iterative.
        let _guard = self.lock.lock();
        // SAFETY: chain mutex held and `&mut self` guarantees exclusivity.
        unsafe {
            let mut current = (*self.sentinel.links.get()).next.take();
            (*self.sentinel.links.get()).prev = None;
            while let Some(node) = current {
                if Arc::ptr_eq(&node, &self.sentinel) {
                    break;
                }
                let links = &mut *node.links.get();
                links.prev = None;
                current = links.next.take();
                node.linked.store(false, Ordering::Release);
            }
        }
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn node(name: &str) -> Arc<Node> {
        let key = Key::from(name);
        let element = Element::with_data(key.clone(), 0, 0, Bytes::copy_from_slice(name.as_bytes()));
        Node::new(key, Arc::new(element))
    }

    fn order(chain: &Chain) -> Vec<String> {
        chain
            .keys_in_order()
            .into_iter()
            .map(|k| k.to_string())
            .collect()
    }

    #[test]
    fn append_preserves_insertion_order() {
        let chain = Chain::new();
        let (a, b, c) = (node("a"), node("b"), node("c"));

        chain.append_to_tail(&a);
        chain.append_to_tail(&b);
        chain.append_to_tail(&c);

        assert_eq!(order(&chain), vec!["a", "b", "c"]);
        assert!(a.is_linked() && b.is_linked() && c.is_linked());
    }

    #[test]
    fn eviction_candidate_is_oldest() {
        let chain = Chain::new();
        assert!(chain.eviction_candidate().is_none());

        let (a, b) = (node("a"), node("b"));
        chain.append_to_tail(&a);
        chain.append_to_tail(&b);

        let candidate = chain.eviction_candidate().unwrap();
        assert!(Arc::ptr_eq(&candidate, &a));
    }

    #[test]
    fn remove_splices_out_middle_and_ends() {
        let chain = Chain::new();
        let (a, b, c) = (node("a"), node("b"), node("c"));
        chain.append_to_tail(&a);
        chain.append_to_tail(&b);
        chain.append_to_tail(&c);

        chain.remove(&b);
        assert_eq!(order(&chain), vec!["a", "c"]);
        assert!(!b.is_linked());

        chain.remove(&a);
        chain.remove(&c);
        assert!(order(&chain).is_empty());
        assert!(chain.eviction_candidate().is_none());
    }

    #[test]
    fn move_to_tail_reorders() {
        let chain = Chain::new();
        let (a, b, c) = (node("a"), node("b"), node("c"));
        chain.append_to_tail(&a);
        chain.append_to_tail(&b);
        chain.append_to_tail(&c);

        chain.move_to_tail(&a);
        assert_eq!(order(&chain), vec!["b", "c", "a"]);

        // Already at tail: no-op.
        chain.move_to_tail(&a);
        assert_eq!(order(&chain), vec!["b", "c", "a"]);
    }

    #[test]
    fn move_to_tail_on_unlinked_node_is_noop() {
        let chain = Chain::new();
        let a = node("a");
        chain.move_to_tail(&a);
        assert!(order(&chain).is_empty());

        chain.append_to_tail(&a);
        chain.remove(&a);
        chain.move_to_tail(&a);
        assert!(order(&chain).is_empty());
    }

    #[test]
    fn value_swap_returns_previous() {
        let a = node("a");
        let first = a.value();
        let replacement = Arc::new(Element::with_data(
            Key::from("a"),
            0,
            0,
            Bytes::from_static(b"new"),
        ));

        let old = a.swap_value(replacement.clone());
        assert!(Arc::ptr_eq(&old, &first));
        assert!(Arc::ptr_eq(&a.value(), &replacement));
    }

    #[test]
    fn cas_value_requires_identity() {
        let a = node("a");
        let current = a.value();
        let equal_but_distinct = Arc::new((*current).clone());
        let next = Arc::new(Element::with_data(
            Key::from("a"),
            0,
            0,
            Bytes::from_static(b"next"),
        ));

        // Same contents, different allocation: must not swap.
        assert!(!a.cas_value(&next, equal_but_distinct.clone()));
        assert!(a.cas_value(&current, next.clone()));
        assert!(!a.cas_value(&current, equal_but_distinct));
        assert!(Arc::ptr_eq(&a.value(), &next));
    }

    #[test]
    fn marked_bit_toggles() {
        let a = node("a");
        assert!(!a.is_marked());
        a.set_marked(true);
        assert!(a.is_marked());
        a.set_marked(false);
        assert!(!a.is_marked());
    }

    #[test]
    fn concurrent_append_and_move() {
        use std::thread;

        let chain = Arc::new(Chain::new());
        let nodes: Vec<_> = (0..64).map(|i| node(&format!("k{i}"))).collect();

        let handles: Vec<_> = nodes
            .chunks(16)
            .map(|chunk| {
                let chain = Arc::clone(&chain);
                let chunk: Vec<_> = chunk.to_vec();
                thread::spawn(move || {
                    for n in &chunk {
                        chain.append_to_tail(n);
                        chain.move_to_tail(n);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(chain.keys_in_order().len(), 64);
        for n in &nodes {
            chain.remove(n);
        }
        assert!(chain.eviction_candidate().is_none());
    }

    #[test]
    fn remove_waits_for_concurrent_append() {
        use std::thread;
        use std::time::Duration;

        let chain = Arc::new(Chain::new());
        let a = node("a");

        let remover = {
            let chain = Arc::clone(&chain);
            let a = Arc::clone(&a);
            thread::spawn(move || {
                // Spins until the main thread publishes the linkage.
                chain.remove(&a);
            })
        };

        thread::sleep(Duration::from_millis(10));
        chain.append_to_tail(&a);
        remover.join().unwrap();

        assert!(!a.is_linked());
        assert!(chain.eviction_candidate().is_none());
    }
}
