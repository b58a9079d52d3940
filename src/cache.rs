//! Memcached command semantics over the ordered concurrent map.
//!
//! [`Cache`] is the façade the protocol layer talks to. It owns the
//! [`OrderedConcurrentMap`], the [`DelayQueue`] of delete-blocked
//! placeholders, the operation counters, and the monotonic CAS counter,
//! and it runs the background scavenger that drains the delay queue.
//!
//! ## Architecture
//!
//! ```text
//!   protocol handlers
//!         │  get/set/add/replace/cas/append/prepend/incr/decr/delete
//!         ▼
//!   ┌───────────────────────────────────────────────────────────────┐
//!   │ Cache                                                         │
//!   │   storage: OrderedConcurrentMap   (bounded, policy-evicting)  │
//!   │   delete_queue: DelayQueue        (blocked placeholders)      │
//!   │   stats: CacheStats               (cmd/hit/miss counters)     │
//!   │   cas_counter: AtomicU64          (starts at 1, monotonic)    │
//!   └───────────────────────────────────────────────────────────────┘
//!         ▲
//!         │ every 2 s (after a 10 s warm-up), one queue poll per tick
//!   scavenger thread ── async_event_ping() ── remove expired blocks
//! ```
//!
//! ## Semantics
//!
//! - Every successful mutating store stamps a fresh CAS token; callers
//!   never choose tokens.
//! - `get` reports a hit only for entries that are neither expired nor
//!   delete-blocked placeholders.
//! - `append`/`prepend`/`cas`/`incr`/`decr` resolve races through the
//!   map's identity-CAS value swap; a lost race is reported, never
//!   retried internally.
//! - A delayed `delete` installs an empty blocked placeholder that
//!   rejects those same write paths until the scavenger removes the key.
//!
//! All time is milliseconds since the Unix epoch, from [`now_millis`].
//!
//! ## Example Usage
//!
//! ```
//! use bytes::Bytes;
//! use memkit::{CacheBuilder, Element, EvictionPolicy, Key, StoreResponse};
//!
//! let cache = CacheBuilder::new(1024, 1 << 20)
//!     .policy(EvictionPolicy::Lru)
//!     .scavenger(false)
//!     .build();
//!
//! let mut e = Element::new(Key::from("greeting"), 0, 0);
//! e.set_data(Bytes::from_static(b"hi"));
//! assert_eq!(cache.set(e), StoreResponse::Stored);
//!
//! let got = cache.get(&[Key::from("greeting")]);
//! assert_eq!(&got[0].as_ref().unwrap().data()[..], b"hi");
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::ds::DelayQueue;
use crate::element::Element;
use crate::key::Key;
use crate::stats::CacheStats;
use crate::store::OrderedConcurrentMap;

/// Delay before the scavenger's first tick.
pub const SCAVENGER_INITIAL_DELAY: Duration = Duration::from_secs(10);

/// Interval between scavenger ticks.
pub const SCAVENGER_PERIOD: Duration = Duration::from_secs(2);

/// Current wall clock in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Response status of the store-class commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreResponse {
    /// The value was stored.
    Stored,
    /// A store precondition failed (e.g. `add` on a present key).
    NotStored,
    /// `cas` lost to a concurrent writer holding a newer token.
    Exists,
    /// The key is absent, expired, or delete-blocked.
    NotFound,
}

/// Response status of the removal commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteResponse {
    /// The entry was removed (or block-listed, for delayed deletes).
    Deleted,
    /// No entry existed for the key.
    NotFound,
}

/// Outcome of `incr`/`decr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrDecrResponse {
    /// The counter's new value.
    Value(u64),
    /// The key is absent, expired, delete-blocked, or the swap lost a
    /// race to a concurrent writer.
    NotFound,
    /// The stored payload is not a decimal unsigned integer; the protocol
    /// layer answers `CLIENT_ERROR`.
    NotNumeric,
}

struct CacheInner {
    storage: OrderedConcurrentMap,
    delete_queue: DelayQueue,
    stats: CacheStats,
    cas_counter: AtomicU64,
    started: i64,
    shutdown: Mutex<bool>,
    shutdown_signal: Condvar,
}

impl CacheInner {
    /// One scavenger tick: polls the delay queue once and removes the key
    /// of a placeholder whose block deadline has passed.
    fn async_event_ping(&self) {
        if let Some(placeholder) = self.delete_queue.poll_expired(now_millis()) {
            tracing::debug!(key = %placeholder.key(), "scavenging delete-blocked key");
            self.storage.remove(placeholder.key());
        }
    }
}

/// The memcached-semantics cache façade. See the [module docs](self).
pub struct Cache {
    inner: Arc<CacheInner>,
    scavenger: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Cache {
    /// Wraps a storage map and starts the background scavenger.
    pub fn new(storage: OrderedConcurrentMap) -> Self {
        Self::build(storage, true)
    }

    /// Wraps a storage map without a scavenger thread.
    ///
    /// Delete-blocked placeholders are then only reaped through explicit
    /// [`async_event_ping`](Cache::async_event_ping) calls. Intended for
    /// embedders that drive their own timer and for deterministic tests.
    pub fn with_scavenger_disabled(storage: OrderedConcurrentMap) -> Self {
        Self::build(storage, false)
    }

    fn build(storage: OrderedConcurrentMap, scavenge: bool) -> Self {
        let inner = Arc::new(CacheInner {
            storage,
            delete_queue: DelayQueue::new(),
            stats: CacheStats::new(),
            cas_counter: AtomicU64::new(1),
            started: now_millis(),
            shutdown: Mutex::new(false),
            shutdown_signal: Condvar::new(),
        });

        let scavenger = if scavenge {
            let worker = Arc::clone(&inner);
            Some(thread::spawn(move || run_scavenger(worker)))
        } else {
            None
        };

        Self {
            inner,
            scavenger: Mutex::new(scavenger),
        }
    }

    /// Returns the underlying storage map.
    pub fn storage(&self) -> &OrderedConcurrentMap {
        &self.inner.storage
    }

    fn next_cas(&self) -> u64 {
        self.inner.cas_counter.fetch_add(1, Ordering::Relaxed)
    }

    // -----------------------------------------------------------------------
    // Retrieval
    // -----------------------------------------------------------------------

    /// Fetches elements for `keys`, positionally aligned with the input.
    ///
    /// Counts one `get` command and one hit or miss per key. Expired
    /// entries and delete-block placeholders are misses.
    pub fn get(&self, keys: &[Key]) -> Vec<Option<Arc<Element>>> {
        self.inner.stats.record_get_cmd();
        let now = now_millis();

        let mut hits = 0;
        let mut misses = 0;
        let mut elements = Vec::with_capacity(keys.len());
        for key in keys {
            match self.inner.storage.get(key) {
                Some(element) if !element.is_expired_at(now) && !element.is_blocked() => {
                    hits += 1;
                    elements.push(Some(element));
                }
                _ => {
                    misses += 1;
                    elements.push(None);
                }
            }
        }
        self.inner.stats.record_hits(hits);
        self.inner.stats.record_misses(misses);
        elements
    }

    // -----------------------------------------------------------------------
    // Stores
    // -----------------------------------------------------------------------

    /// Unconditionally stores `e` under its key. Always `Stored`.
    pub fn set(&self, mut e: Element) -> StoreResponse {
        self.inner.stats.record_set_cmd();
        e.set_cas(self.next_cas());
        let key = e.key().clone();
        self.inner.storage.put(key, Arc::new(e));
        StoreResponse::Stored
    }

    /// Stores `e` only if its key is absent.
    pub fn add(&self, mut e: Element) -> StoreResponse {
        e.set_cas(self.next_cas());
        let key = e.key().clone();
        match self.inner.storage.put_if_absent(key, Arc::new(e)) {
            None => StoreResponse::Stored,
            Some(_) => StoreResponse::NotStored,
        }
    }

    /// Stores `e` only if its key is already present.
    pub fn replace(&self, mut e: Element) -> StoreResponse {
        e.set_cas(self.next_cas());
        let key = e.key().clone();
        match self.inner.storage.replace(&key, Arc::new(e)) {
            Some(_) => StoreResponse::Stored,
            None => StoreResponse::NotStored,
        }
    }

    /// Appends `e`'s payload to the stored element's payload.
    ///
    /// `NotFound` (and a miss) when the key is absent, expired, or
    /// blocked; `NotStored` when a concurrent writer won the swap.
    pub fn append(&self, e: Element) -> StoreResponse {
        self.combine(e, Element::append)
    }

    /// Prepends `e`'s payload to the stored element's payload.
    ///
    /// Mirror of [`append`](Cache::append).
    pub fn prepend(&self, e: Element) -> StoreResponse {
        self.combine(e, Element::prepend)
    }

    fn combine(
        &self,
        e: Element,
        derive: impl FnOnce(&Element, &Element) -> Element,
    ) -> StoreResponse {
        let now = now_millis();
        let key = e.key().clone();
        let old = match self.inner.storage.get(&key) {
            Some(old) if !old.is_blocked_at(now) && !old.is_expired_at(now) => old,
            _ => {
                self.inner.stats.record_miss();
                return StoreResponse::NotFound;
            }
        };

        let mut combined = derive(&old, &e);
        combined.set_cas(self.next_cas());
        if self.inner.storage.replace_entry(&key, &old, Arc::new(combined)) {
            StoreResponse::Stored
        } else {
            StoreResponse::NotStored
        }
    }

    /// Stores `e` only if the entry's CAS token still equals
    /// `expected_cas`.
    ///
    /// `Exists` when another writer got there first, `NotFound` when the
    /// key is absent or blocked (or vanished between the token check and
    /// the swap).
    pub fn cas(&self, expected_cas: u64, mut e: Element) -> StoreResponse {
        let now = now_millis();
        let key = e.key().clone();
        let current = match self.inner.storage.get(&key) {
            Some(current) if !current.is_blocked_at(now) => current,
            _ => {
                self.inner.stats.record_miss();
                return StoreResponse::NotFound;
            }
        };

        if current.cas() != expected_cas {
            return StoreResponse::Exists;
        }

        e.set_cas(self.next_cas());
        if self.inner.storage.replace_entry(&key, &current, Arc::new(e)) {
            StoreResponse::Stored
        } else {
            self.inner.stats.record_miss();
            StoreResponse::NotFound
        }
    }

    /// Applies a signed delta to the entry's payload interpreted as a
    /// decimal unsigned integer. See [`Element::incr_decr`] for the
    /// clamping rules.
    pub fn incr_decr(&self, key: &Key, delta: i64) -> IncrDecrResponse {
        let now = now_millis();
        let old = match self.inner.storage.get(key) {
            Some(old) if !old.is_blocked_at(now) && !old.is_expired_at(now) => old,
            _ => {
                self.inner.stats.record_miss();
                return IncrDecrResponse::NotFound;
            }
        };

        let (value, mut replacement) = match old.incr_decr(delta) {
            Ok(result) => result,
            Err(_) => return IncrDecrResponse::NotNumeric,
        };
        replacement.set_cas(self.next_cas());
        if self
            .inner
            .storage
            .replace_entry(key, &old, Arc::new(replacement))
        {
            IncrDecrResponse::Value(value)
        } else {
            IncrDecrResponse::NotFound
        }
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    /// Removes `key`, immediately or with a write-blocking delay.
    ///
    /// With `block_time_millis == 0` the entry is removed at once. With a
    /// positive delay, an empty blocked placeholder replaces the entry
    /// and is queued for the scavenger; until the deadline passes,
    /// `add`/`append`/`prepend`/`cas`/`incr`/`decr` on the key are
    /// refused. `Deleted` is returned iff an entry existed.
    pub fn delete(&self, key: &Key, block_time_millis: i64) -> DeleteResponse {
        if block_time_millis == 0 {
            return match self.inner.storage.remove(key) {
                Some(_) => DeleteResponse::Deleted,
                None => DeleteResponse::NotFound,
            };
        }

        let mut placeholder = Element::new(key.clone(), 0, 0);
        placeholder.block(now_millis() + block_time_millis);
        let placeholder = Arc::new(placeholder);

        if self
            .inner
            .storage
            .replace(key, Arc::clone(&placeholder))
            .is_some()
        {
            self.inner.delete_queue.add(placeholder);
            DeleteResponse::Deleted
        } else {
            DeleteResponse::NotFound
        }
    }

    /// Clears the entire cache. Always returns `true`.
    pub fn flush_all(&self) -> bool {
        self.flush_all_delay(0)
    }

    /// Clears the entire cache.
    ///
    /// The delay parameter is accepted for protocol compatibility and
    /// ignored; the flush is immediate.
    pub fn flush_all_delay(&self, _delay_millis: i64) -> bool {
        self.inner.storage.clear();
        true
    }

    // -----------------------------------------------------------------------
    // Scavenging
    // -----------------------------------------------------------------------

    /// Runs one scavenger tick by hand: polls the delete queue once and
    /// removes the key of a placeholder whose deadline has passed.
    ///
    /// The background scavenger calls this on its own timer; embedders
    /// without one call it from their event loop.
    pub fn async_event_ping(&self) {
        self.inner.async_event_ping();
    }

    /// Number of delete-blocked placeholders awaiting the scavenger.
    pub fn pending_deletes(&self) -> usize {
        self.inner.delete_queue.len()
    }

    // -----------------------------------------------------------------------
    // Introspection & statistics
    // -----------------------------------------------------------------------

    /// Snapshot of all keys currently in the cache.
    pub fn keys(&self) -> Vec<Key> {
        self.inner.storage.keys()
    }

    /// Current item count.
    pub fn current_items(&self) -> usize {
        self.inner.storage.size()
    }

    /// Configured memory capacity in bytes.
    pub fn limit_max_bytes(&self) -> u64 {
        self.inner.storage.memory_capacity()
    }

    /// Current byte footprint.
    pub fn current_bytes(&self) -> u64 {
        self.inner.storage.memory_used()
    }

    /// Total `get` commands executed.
    pub fn cmd_gets(&self) -> u64 {
        self.inner.stats.cmd_gets()
    }

    /// Total `set` commands executed.
    pub fn cmd_sets(&self) -> u64 {
        self.inner.stats.cmd_sets()
    }

    /// Cumulative `get` hits.
    pub fn get_hits(&self) -> u64 {
        self.inner.stats.get_hits()
    }

    /// Cumulative misses (including append/prepend/cas/incr/decr misses).
    pub fn get_misses(&self) -> u64 {
        self.inner.stats.get_misses()
    }

    /// Builds the `stats` command response: metric name to the set of
    /// reported values.
    ///
    /// `arg` selects an extended sub-category in canonical memcached;
    /// like the counters themselves it is currently ignored and the full
    /// map is returned.
    pub fn stat(&self, arg: Option<&str>) -> FxHashMap<String, FxHashSet<String>> {
        let _ = arg;
        let now = now_millis();
        let mut result = FxHashMap::default();

        multi_set(&mut result, "cmd_gets", self.cmd_gets().to_string());
        multi_set(&mut result, "cmd_sets", self.cmd_sets().to_string());
        multi_set(&mut result, "get_hits", self.get_hits().to_string());
        multi_set(&mut result, "get_misses", self.get_misses().to_string());
        multi_set(&mut result, "time", now.to_string());
        multi_set(&mut result, "uptime", (now - self.inner.started).to_string());
        multi_set(&mut result, "cur_items", self.current_items().to_string());
        multi_set(&mut result, "limit_maxbytes", self.limit_max_bytes().to_string());
        multi_set(&mut result, "current_bytes", self.current_bytes().to_string());
        multi_set(
            &mut result,
            "free_bytes",
            self.limit_max_bytes()
                .saturating_sub(self.current_bytes())
                .to_string(),
        );
        multi_set(&mut result, "pid", std::process::id().to_string());

        // Faked because some clients expect them.
        multi_set(&mut result, "rusage_user", "0:0".to_string());
        multi_set(&mut result, "rusage_system", "0:0".to_string());
        multi_set(&mut result, "connection_structures", "0".to_string());
        multi_set(&mut result, "bytes_read", "0".to_string());
        multi_set(&mut result, "bytes_written", "0".to_string());

        result
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Stops the scavenger and clears the map.
    ///
    /// The network layer is expected to stop accepting requests first;
    /// operations after `close` see an empty but functional cache.
    pub fn close(&self) {
        {
            let mut shutdown = self.inner.shutdown.lock();
            *shutdown = true;
            self.inner.shutdown_signal.notify_all();
        }
        if let Some(handle) = self.scavenger.lock().take() {
            if handle.join().is_err() {
                tracing::error!("scavenger thread panicked");
            }
        }
        self.inner.storage.close();
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("storage", &self.inner.storage)
            .field("pending_deletes", &self.inner.delete_queue.len())
            .field("started", &self.inner.started)
            .finish_non_exhaustive()
    }
}

fn run_scavenger(inner: Arc<CacheInner>) {
    tracing::debug!("scavenger started");
    let mut delay = SCAVENGER_INITIAL_DELAY;
    loop {
        {
            let mut shutdown = inner.shutdown.lock();
            if !*shutdown {
                let _ = inner.shutdown_signal.wait_for(&mut shutdown, delay);
            }
            if *shutdown {
                tracing::debug!("scavenger stopped");
                return;
            }
        }
        inner.async_event_ping();
        delay = SCAVENGER_PERIOD;
    }
}

fn multi_set(map: &mut FxHashMap<String, FxHashSet<String>>, name: &str, value: String) {
    map.entry(name.to_string()).or_default().insert(value);
}
