//! Operation counters backing the `stats` command.
//!
//! Plain atomic counters with no coordination against the operations they
//! observe; readers get an eventually-consistent snapshot, which is all
//! memcached's `stats` promises.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the four memcached metrics the cache maintains itself.
#[derive(Debug, Default)]
pub struct CacheStats {
    cmd_gets: AtomicU64,
    cmd_sets: AtomicU64,
    get_hits: AtomicU64,
    get_misses: AtomicU64,
}

impl CacheStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one `get` command (regardless of how many keys it carried).
    #[inline]
    pub fn record_get_cmd(&self) {
        self.cmd_gets.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one `set` command.
    #[inline]
    pub fn record_set_cmd(&self) {
        self.cmd_sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a batch of hits (one `get` can carry many keys).
    #[inline]
    pub fn record_hits(&self, hits: u64) {
        self.get_hits.fetch_add(hits, Ordering::Relaxed);
    }

    /// Adds a batch of misses.
    #[inline]
    pub fn record_misses(&self, misses: u64) {
        self.get_misses.fetch_add(misses, Ordering::Relaxed);
    }

    /// Records a single miss (append/prepend/cas/incr/decr miss paths).
    #[inline]
    pub fn record_miss(&self) {
        self.record_misses(1);
    }

    /// Total `get` commands.
    #[inline]
    pub fn cmd_gets(&self) -> u64 {
        self.cmd_gets.load(Ordering::Relaxed)
    }

    /// Total `set` commands.
    #[inline]
    pub fn cmd_sets(&self) -> u64 {
        self.cmd_sets.load(Ordering::Relaxed)
    }

    /// Cumulative hits.
    #[inline]
    pub fn get_hits(&self) -> u64 {
        self.get_hits.load(Ordering::Relaxed)
    }

    /// Cumulative misses.
    #[inline]
    pub fn get_misses(&self) -> u64 {
        self.get_misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = CacheStats::new();
        stats.record_get_cmd();
        stats.record_get_cmd();
        stats.record_set_cmd();
        stats.record_hits(3);
        stats.record_misses(2);
        stats.record_miss();

        assert_eq!(stats.cmd_gets(), 2);
        assert_eq!(stats.cmd_sets(), 1);
        assert_eq!(stats.get_hits(), 3);
        assert_eq!(stats.get_misses(), 3);
    }

    #[test]
    fn counters_are_shared_across_threads() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(CacheStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        stats.record_get_cmd();
                        stats.record_hits(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.cmd_gets(), 4_000);
        assert_eq!(stats.get_hits(), 4_000);
    }
}
