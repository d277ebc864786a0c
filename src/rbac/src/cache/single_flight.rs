//! Keyed cache that runs at most one fetch per key at a time

use super::{CacheConfig, CacheStats};
use crate::error::{RbacError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

const HITS: &str = "hits";
const MISSES: &str = "misses";
const COALESCED: &str = "coalesced";
const FETCHES: &str = "fetches";
const FAILURES: &str = "failures";
const EXPIRATIONS: &str = "expirations";
const EVICTIONS: &str = "evictions";

/// Outcome shared by every waiter of one fetch
type FetchOutcome<V> = std::result::Result<V, Arc<RbacError>>;

type SharedFetch<V> = Shared<BoxFuture<'static, FetchOutcome<V>>>;

/// Invalidation generation a value was fetched under
///
/// A value is only served while the stamp it was stored with is current, so a
/// fetch that straddles an invalidation never becomes visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    key_epoch: u64,
    global_epoch: u64,
}

/// Cached value with its fetch time
#[derive(Debug, Clone)]
struct CachedEntry<V> {
    value: V,
    cached_at: Instant,
    stamp: Stamp,
}

impl<V> CachedEntry<V> {
    fn new(value: V, stamp: Stamp) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            stamp,
        }
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.cached_at.elapsed() > ttl)
    }
}

/// Marker for a running fetch
struct InFlight<V> {
    id: u64,
    shared: SharedFetch<V>,
}

struct Inner<V> {
    name: String,
    capacity: usize,
    ttl: Option<Duration>,
    values: DashMap<String, CachedEntry<V>>,
    inflight: DashMap<String, InFlight<V>>,
    epochs: DashMap<String, u64>,
    global_epoch: AtomicU64,
    next_flight: AtomicU64,
    stats: DashMap<String, usize>,
}

/// Single-flight cache
///
/// Per key the lifecycle is `Empty -> Fetching -> Cached` on success,
/// `Fetching -> Empty` on failure, and `Cached -> Empty` on invalidation or
/// expiry. Concurrent [`get_or_fetch`](Self::get_or_fetch) calls on an
/// uncached key run the fetch exactly once and all observe the same outcome.
///
/// Cloning is cheap and clones share state.
pub struct SingleFlightCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for SingleFlightCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for SingleFlightCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlightCache")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("ttl", &self.inner.ttl)
            .field("entries", &self.inner.values.len())
            .field("in_flight", &self.inner.inflight.len())
            .finish()
    }
}

impl<V> SingleFlightCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new cache; `name` labels its log lines
    pub fn new(name: impl Into<String>, config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                capacity: config.capacity.max(1),
                ttl: config.ttl(),
                values: DashMap::new(),
                inflight: DashMap::new(),
                epochs: DashMap::new(),
                global_epoch: AtomicU64::new(0),
                next_flight: AtomicU64::new(0),
                stats: DashMap::new(),
            }),
        }
    }

    /// Cache name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Return the cached value for `key`, or fetch it
    ///
    /// If a fetch for `key` is already running, waits for it instead of
    /// starting another. The fetch runs on a spawned task and is not
    /// cancelled when the caller is dropped.
    ///
    /// # Errors
    ///
    /// - `CacheFetchFailure` wrapping the fetch error, shared by every waiter
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        if let Some(value) = self.inner.lookup(key) {
            self.inner.increment_stat(HITS);
            debug!(cache = %self.inner.name, key = %key, "cache hit");
            return Ok(value);
        }

        let shared = match self.inner.inflight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                self.inner.increment_stat(MISSES);
                self.inner.increment_stat(COALESCED);
                debug!(cache = %self.inner.name, key = %key, "joining in-flight fetch");
                entry.get().shared.clone()
            }
            Entry::Vacant(entry) => {
                // A fetch may have completed since the first lookup
                if let Some(value) = self.inner.lookup(key) {
                    self.inner.increment_stat(HITS);
                    return Ok(value);
                }

                self.inner.increment_stat(MISSES);
                self.inner.increment_stat(FETCHES);
                debug!(cache = %self.inner.name, key = %key, "cache miss, starting fetch");

                let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                let stamp = self.inner.current_stamp(key);
                let (tx, rx) = oneshot::channel::<FetchOutcome<V>>();

                let dropped_key = key.to_string();
                let shared = async move {
                    rx.await.unwrap_or_else(|_| {
                        Err(Arc::new(RbacError::Internal(format!(
                            "fetch for '{}' ended without a result",
                            dropped_key
                        ))))
                    })
                }
                .boxed()
                .shared();

                entry.insert(InFlight {
                    id,
                    shared: shared.clone(),
                });

                let inner = Arc::clone(&self.inner);
                let owned_key = key.to_string();
                tokio::spawn(async move {
                    let outcome = match AssertUnwindSafe(async move { fetch().await })
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => result.map_err(Arc::new),
                        Err(_) => Err(Arc::new(RbacError::Internal(format!(
                            "fetch for '{}' panicked",
                            owned_key
                        )))),
                    };
                    inner.complete(&owned_key, id, stamp, &outcome);
                    // Every receiver may be gone; the value is stored regardless
                    let _ = tx.send(outcome);
                });

                shared
            }
        };

        shared
            .await
            .map_err(|source| RbacError::CacheFetchFailure {
                key: key.to_string(),
                source,
            })
    }

    /// Cached value for `key` without fetching
    pub fn peek(&self, key: &str) -> Option<V> {
        self.inner.lookup(key)
    }

    /// Whether a fetch for `key` is running
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.inflight.contains_key(key)
    }

    /// Drop the cached value for `key`
    ///
    /// A running fetch is not cancelled and its waiters still receive its
    /// outcome. Unlike a plain refresh-on-completion cache, that outcome does
    /// not populate the cache: it may have been read before the write that
    /// triggered the invalidation, so the next call fetches again.
    pub fn invalidate(&self, key: &str) {
        // The in-flight check comes first: a finishing fetch stores its value
        // before clearing its marker, so one of the two is always seen.
        let referenced =
            self.inner.inflight.contains_key(key) || self.inner.values.contains_key(key);
        if referenced {
            *self.inner.epochs.entry(key.to_string()).or_insert(0) += 1;
        }
        self.inner.values.remove(key);
        debug!(cache = %self.inner.name, key = %key, "invalidated");
    }

    /// Drop every cached value
    pub fn invalidate_all(&self) {
        self.inner.global_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.epochs.clear();
        self.inner.values.clear();
        debug!(cache = %self.inner.name, "invalidated all entries");
    }

    /// Number of cached values
    pub fn len(&self) -> usize {
        self.inner.values.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.inner.values.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.get_stat(HITS),
            misses: self.inner.get_stat(MISSES),
            coalesced: self.inner.get_stat(COALESCED),
            fetches: self.inner.get_stat(FETCHES),
            failures: self.inner.get_stat(FAILURES),
            expirations: self.inner.get_stat(EXPIRATIONS),
            evictions: self.inner.get_stat(EVICTIONS),
            entries: self.inner.values.len(),
            in_flight: self.inner.inflight.len(),
            capacity: self.inner.capacity,
        }
    }
}

impl<V> Inner<V>
where
    V: Clone,
{
    fn current_stamp(&self, key: &str) -> Stamp {
        Stamp {
            key_epoch: self.epochs.get(key).map(|epoch| *epoch).unwrap_or(0),
            global_epoch: self.global_epoch.load(Ordering::SeqCst),
        }
    }

    /// Valid cached value, dropping a stale or expired one
    fn lookup(&self, key: &str) -> Option<V> {
        let stamp = self.current_stamp(key);
        let expired = {
            let entry = self.values.get(key)?;
            if entry.stamp == stamp && !entry.is_expired(self.ttl) {
                return Some(entry.value.clone());
            }
            entry.is_expired(self.ttl)
        };

        let ttl = self.ttl;
        let removed = self
            .values
            .remove_if(key, |_, entry| entry.stamp != stamp || entry.is_expired(ttl));
        if removed.is_some() && expired {
            self.increment_stat(EXPIRATIONS);
            debug!(cache = %self.name, key = %key, "cached value expired");
        }
        None
    }

    /// Record a finished fetch and clear its in-flight marker
    fn complete(&self, key: &str, id: u64, stamp: Stamp, outcome: &FetchOutcome<V>) {
        match outcome {
            Ok(value) => {
                if self.current_stamp(key) == stamp {
                    self.store(key, value.clone(), stamp);
                } else {
                    debug!(
                        cache = %self.name,
                        key = %key,
                        "invalidated during fetch, result not stored"
                    );
                }
            }
            Err(error) => {
                self.increment_stat(FAILURES);
                warn!(cache = %self.name, key = %key, error = %error, "fetch failed");
            }
        }

        // Stored before the marker goes, so late callers find the value
        self.inflight.remove_if(key, |_, flight| flight.id == id);
    }

    fn store(&self, key: &str, value: V, stamp: Stamp) {
        if !self.values.contains_key(key) && self.values.len() >= self.capacity {
            self.evict_oldest();
        }
        self.values
            .insert(key.to_string(), CachedEntry::new(value, stamp));
    }

    fn evict_oldest(&self) {
        let oldest = self
            .values
            .iter()
            .min_by_key(|entry| entry.cached_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            if self.values.remove(&key).is_some() {
                self.increment_stat(EVICTIONS);
                debug!(cache = %self.name, key = %key, "evicted oldest entry");
            }
        }
    }

    fn increment_stat(&self, key: &str) {
        *self.stats.entry(key.to_string()).or_insert(0) += 1;
    }

    fn get_stat(&self, key: &str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}
