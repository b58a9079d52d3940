//! memkit: the in-memory cache core of a memcached-compatible daemon.
//!
//! A bounded concurrent key/value store with memcached command semantics
//! (`set`/`add`/`replace`/`cas`/`append`/`prepend`/`incr`/`decr`/`get`/
//! `delete`/`flush_all`), dual item-count and byte-footprint capacity
//! limits, and three pluggable eviction policies (FIFO, second-chance,
//! LRU) running over an intrusive ordering chain that cross-cuts a
//! sharded hash index.
//!
//! The wire protocol, network acceptor, and daemon lifecycle are clients
//! of this crate, not part of it.
//!
//! ```
//! use bytes::Bytes;
//! use memkit::{CacheBuilder, Element, EvictionPolicy, Key, StoreResponse};
//!
//! let cache = CacheBuilder::new(2, 1 << 20)
//!     .policy(EvictionPolicy::Lru)
//!     .scavenger(false)
//!     .build();
//!
//! for (k, v) in [("k1", "a"), ("k2", "b")] {
//!     let e = Element::with_data(Key::from(k), 0, 0, Bytes::copy_from_slice(v.as_bytes()));
//!     assert_eq!(cache.set(e), StoreResponse::Stored);
//! }
//!
//! // Touch k1, then overflow: LRU drops k2.
//! cache.get(&[Key::from("k1")]);
//! cache.set(Element::with_data(Key::from("k3"), 0, 0, Bytes::from_static(b"c")));
//! assert!(cache.get(&[Key::from("k2")])[0].is_none());
//! assert!(cache.get(&[Key::from("k1")])[0].is_some());
//! ```

pub mod builder;
pub mod cache;
pub mod ds;
pub mod element;
pub mod error;
pub mod key;
pub mod policy;
pub mod prelude;
pub mod stats;
pub mod store;

pub use builder::CacheBuilder;
pub use cache::{Cache, DeleteResponse, IncrDecrResponse, StoreResponse};
pub use element::{Element, THIRTY_DAYS_MILLIS};
pub use key::Key;
pub use policy::EvictionPolicy;
pub use store::OrderedConcurrentMap;
