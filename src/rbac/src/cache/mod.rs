//! Single-flight caching for role grants and the resource catalog
//!
//! # Features
//!
//! - **Request coalescing**: concurrent misses on one key share a single fetch
//! - **Detached fetches**: a fetch runs on its own task, so callers that give
//!   up do not cancel it for the others
//! - **Failure sharing**: every waiter receives the same error; failures are
//!   never cached
//! - **Invalidation**: per key or global, safe to call while a fetch is running
//! - **TTL expiry and capacity bound** with oldest-entry eviction
//!
//! # Example
//!
//! ```rust
//! use cretoai_rbac::cache::{CacheConfig, SingleFlightCache};
//!
//! # tokio_test::block_on(async {
//! let cache: SingleFlightCache<u32> = SingleFlightCache::new("answers", &CacheConfig::default());
//!
//! let value = cache.get_or_fetch("life", || async { Ok(42) }).await.unwrap();
//! assert_eq!(value, 42);
//! assert_eq!(cache.peek("life"), Some(42));
//! # });
//! ```

mod single_flight;

pub use single_flight::SingleFlightCache;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache sizing and expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached values
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Time-to-live in seconds, `0` disables expiry
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_capacity() -> usize {
    10_000
}

fn default_ttl_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheConfig {
    /// Config with the given capacity and TTL
    pub fn new(capacity: usize, ttl_secs: u64) -> Self {
        Self { capacity, ttl_secs }
    }

    /// Expiry duration, `None` when expiry is disabled
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

/// Statistics about cache performance
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups served from a cached value
    pub hits: usize,
    /// Lookups that found no valid value
    pub misses: usize,
    /// Misses that joined a fetch already in flight
    pub coalesced: usize,
    /// Fetches started
    pub fetches: usize,
    /// Fetches that failed
    pub failures: usize,
    /// Expired values dropped on lookup
    pub expirations: usize,
    /// Values dropped to stay within capacity
    pub evictions: usize,
    /// Values currently cached
    pub entries: usize,
    /// Fetches currently running
    pub in_flight: usize,
    /// Maximum number of cached values
    pub capacity: usize,
}

impl CacheStats {
    /// Calculates the cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
