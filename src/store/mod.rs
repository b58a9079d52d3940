pub mod ordered;

pub use ordered::{EvictionListener, NoopListener, OrderedConcurrentMap, DEFAULT_SHARDS};
