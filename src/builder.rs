//! Cache builder: capacity bounds, eviction policy, sharding, scavenger.
//!
//! Hides the map construction and scavenger wiring behind a small fluent
//! API. The two capacity bounds are the only required parameters; the
//! core prescribes no defaults for them.
//!
//! ## Example
//!
//! ```
//! use memkit::builder::CacheBuilder;
//! use memkit::policy::EvictionPolicy;
//!
//! let cache = CacheBuilder::new(10_000, 64 << 20)
//!     .policy(EvictionPolicy::SecondChance)
//!     .shards(32)
//!     .scavenger(false)
//!     .build();
//! assert_eq!(cache.current_items(), 0);
//! ```

use crate::cache::Cache;
use crate::error::ConfigError;
use crate::policy::EvictionPolicy;
use crate::store::{EvictionListener, NoopListener, OrderedConcurrentMap, DEFAULT_SHARDS};

/// Fluent configuration for a [`Cache`].
pub struct CacheBuilder {
    max_items: usize,
    max_bytes: u64,
    policy: EvictionPolicy,
    shards: usize,
    scavenger: bool,
    listener: Box<dyn EvictionListener>,
}

impl CacheBuilder {
    /// Starts a builder bounded to `max_items` entries and `max_bytes`
    /// of payload.
    ///
    /// Defaults: FIFO policy, 16 shards, scavenger enabled, no eviction
    /// listener.
    pub fn new(max_items: usize, max_bytes: u64) -> Self {
        Self {
            max_items,
            max_bytes,
            policy: EvictionPolicy::Fifo,
            shards: DEFAULT_SHARDS,
            scavenger: true,
            listener: Box::new(NoopListener),
        }
    }

    /// Selects the eviction policy.
    pub fn policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the hash-index shard count (clamped to at least 1).
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards.max(1);
        self
    }

    /// Sets the shard count, rejecting zero instead of clamping.
    pub fn try_shards(mut self, shards: usize) -> Result<Self, ConfigError> {
        if shards == 0 {
            return Err(ConfigError::new("shards must be > 0"));
        }
        self.shards = shards;
        Ok(self)
    }

    /// Enables or disables the background scavenger thread.
    ///
    /// With the scavenger disabled, delete-blocked placeholders are only
    /// reaped through [`Cache::async_event_ping`].
    pub fn scavenger(mut self, enabled: bool) -> Self {
        self.scavenger = enabled;
        self
    }

    /// Installs an eviction notification hook.
    pub fn eviction_listener(mut self, listener: Box<dyn EvictionListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Builds the cache.
    pub fn build(self) -> Cache {
        let storage = OrderedConcurrentMap::with_listener(
            self.policy,
            self.max_items,
            self.max_bytes,
            self.shards,
            self.listener,
        );
        if self.scavenger {
            Cache::new(storage)
        } else {
            Cache::with_scavenger_disabled(storage)
        }
    }
}

impl std::fmt::Debug for CacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("max_items", &self.max_items)
            .field("max_bytes", &self.max_bytes)
            .field("policy", &self.policy)
            .field("shards", &self.shards)
            .field("scavenger", &self.scavenger)
            .finish_non_exhaustive()
    }
}
