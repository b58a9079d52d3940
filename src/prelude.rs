pub use crate::builder::CacheBuilder;
pub use crate::cache::{now_millis, Cache, DeleteResponse, IncrDecrResponse, StoreResponse};
pub use crate::ds::DelayQueue;
pub use crate::element::Element;
pub use crate::error::{ConfigError, DecodeError, NotNumericError};
pub use crate::key::Key;
pub use crate::policy::EvictionPolicy;
pub use crate::stats::CacheStats;
pub use crate::store::{EvictionListener, NoopListener, OrderedConcurrentMap};
