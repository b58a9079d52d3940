//! Eviction policies over the ordering chain.
//!
//! The replacement policy decides what happens when an entry is accessed
//! and whether the chain's oldest node should be discarded when the map
//! overflows. Policies are a tagged enum rather than trait objects: the
//! dispatch is a `match`, with no allocation per call.
//!
//! ## Policies
//!
//! ```text
//!   FIFO           on_access: nothing
//!                  on_evict:  always evict — pure insertion order
//!
//!   SECOND_CHANCE  on_access: set the node's reference bit
//!                  on_evict:  marked? clear bit, recycle to tail, skip
//!                             else evict
//!                  (degrades to FIFO when every entry is marked)
//!
//!   LRU            on_access: move node to tail under the chain mutex
//!                  on_evict:  always evict — head is least recent
//! ```
//!
//! Second-chance tracks "hot" entries at FIFO cost on the access path; LRU
//! pays a chain-mutex acquisition per hit for an exact recency order.

use std::sync::Arc;

use crate::ds::chain::{Chain, Node};

/// The rule applied to choose which entry to discard when the map exceeds
/// capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Evicts in insertion order.
    Fifo,
    /// Insertion order, but entries accessed since the last eviction scan
    /// are recycled once before being discarded.
    SecondChance,
    /// Evicts the least recently used entry.
    Lru,
}

impl EvictionPolicy {
    /// Hook invoked after a node is successfully retrieved.
    pub(crate) fn on_access(&self, chain: &Chain, node: &Arc<Node>) {
        match self {
            EvictionPolicy::Fifo => {}
            EvictionPolicy::SecondChance => node.set_marked(true),
            EvictionPolicy::Lru => chain.move_to_tail(node),
        }
    }

    /// Decides whether the chain's oldest node should be removed.
    ///
    /// Returning `false` means the policy recycled the node and the
    /// eviction loop should look at the new head instead.
    pub(crate) fn on_evict(&self, chain: &Chain, node: &Arc<Node>) -> bool {
        match self {
            EvictionPolicy::Fifo | EvictionPolicy::Lru => true,
            EvictionPolicy::SecondChance => {
                if node.is_marked() {
                    chain.move_to_tail(node);
                    node.set_marked(false);
                    false
                } else {
                    true
                }
            }
        }
    }
}
