//! Time-ordered queue of delete-blocked placeholders.
//!
//! A [`DelayQueue`] holds the placeholder elements installed by delayed
//! deletes, ordered by block deadline. The scavenger polls it once per
//! tick and removes the corresponding key from the map when a deadline
//! has passed.
//!
//! ## Architecture
//!
//! ```text
//!   BinaryHeap<Reverse<Delayed>>       (min-heap on blocked_until)
//!
//!   min: (t=1200, "a"), (t=1200, "b"), (t=3400, "x")
//!                 │
//!                 └── equal deadlines break ties lexicographically
//!                     on the key bytes
//! ```
//!
//! ## Operations
//! - `add(placeholder)`: push a blocked placeholder
//! - `poll_expired(now)`: pop the earliest entry iff its deadline ≤ now
//!
//! Both take the queue mutex for the duration of a heap operation.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::element::Element;

#[derive(Debug)]
struct Delayed {
    element: Arc<Element>,
}

impl Delayed {
    fn deadline(&self) -> i64 {
        self.element.blocked_until()
    }
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.deadline().cmp(&other.deadline()) {
            Ordering::Equal => self
                .element
                .key()
                .bytes()
                .cmp(other.element.key().bytes()),
            ordering => ordering,
        }
    }
}

/// Concurrent min-heap of blocked placeholders keyed on their deadline.
#[derive(Debug, Default)]
pub struct DelayQueue {
    heap: Mutex<BinaryHeap<Reverse<Delayed>>>,
}

impl DelayQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a blocked placeholder.
    pub fn add(&self, placeholder: Arc<Element>) {
        self.heap.lock().push(Reverse(Delayed {
            element: placeholder,
        }));
    }

    /// Removes and returns the earliest placeholder whose deadline is at
    /// or before `now_millis`, or `None` if no entry is due yet.
    pub fn poll_expired(&self, now_millis: i64) -> Option<Arc<Element>> {
        let mut heap = self.heap.lock();
        match heap.peek() {
            Some(Reverse(entry)) if entry.deadline() <= now_millis => {
                heap.pop().map(|Reverse(entry)| entry.element)
            }
            _ => None,
        }
    }

    /// Returns the number of queued placeholders.
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Returns `true` if no placeholders are queued.
    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Drops all queued placeholders.
    pub fn clear(&self) {
        self.heap.lock().clear();
    }
}
