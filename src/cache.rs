//! The main cache interface.
//!
//! This module provides the primary `Cache` type that users interact with.
//! It wraps the internal lock-free table and provides a clean, thread-safe
//! API.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use ahash::RandomState;

use crate::clock::{Clock, MonotonicClock, Timestamp};
use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::eviction::EvictionReport;
use crate::maintenance::Evictor;
use crate::stats::{CacheStats, StatsSnapshot};
use crate::storage::{Lookup, LruHashMap};

/// A fixed-capacity, lock-free TTL cache with approximate LRU eviction.
///
/// # Features
/// - **Lock-free**: `get`, `put` and `erase` never take a lock and never
///   free memory; they can run from any number of threads.
/// - **TTL with jitter**: every value expires around the configured TTL,
///   spread so that bulk writes do not expire together.
/// - **Approximate LRU**: a single maintenance actor (`evict`, or the
///   background `Evictor`) trims the cache back to capacity by dropping the
///   least recently used entries.
/// - **Statistics**: Track hits, misses, evictions, and reclamation.
///
/// Between eviction passes the cache may hold more than `capacity` entries.
///
/// # Example
/// ```
/// use lockfree_ttl_cache::{Cache, CacheConfig};
///
/// // A cache of about 1000 entries, each living about 5 minutes
/// let cache: Cache<String, String> = Cache::new(CacheConfig::new("users", 1000, 300));
///
/// // Basic operations
/// cache.put("user:123".to_string(), "Alice".to_string());
/// if let Some(value) = cache.get("user:123") {
///     println!("Found: {}", value);
/// }
///
/// // Trim back to capacity and free retired memory
/// let report = cache.evict();
/// assert_eq!(report.unlinked, 0);
///
/// // Check statistics
/// let stats = cache.stats();
/// println!("Hit rate: {:.1}%", stats.hit_rate);
/// ```
pub struct Cache<K, V, S = RandomState> {
    /// Internal storage.
    map: Arc<LruHashMap<K, V, S>>,
}

impl<K, V> Cache<K, V, RandomState>
where
    K: Hash + Eq,
{
    /// Create a new cache with the given configuration.
    ///
    /// # Panics
    /// Panics if the configuration is invalid. Use `try_new` to handle the
    /// error instead.
    ///
    /// # Example
    /// ```
    /// use lockfree_ttl_cache::{Cache, CacheConfig};
    ///
    /// let cache: Cache<u64, u64> = Cache::new(CacheConfig::new("ids", 128, 60));
    /// assert_eq!(cache.capacity(), 128);
    /// ```
    pub fn new(config: CacheConfig) -> Self {
        match Self::try_new(config) {
            Ok(cache) => cache,
            Err(err) => {
                tracing::error!(error = %err, "cannot create cache");
                panic!("cannot create cache: {}", err);
            }
        }
    }

    /// Create a new cache, returning an error for an invalid configuration.
    ///
    /// # Example
    /// ```
    /// use lockfree_ttl_cache::{Cache, CacheConfig, CacheError};
    ///
    /// let result = Cache::<u64, u64>::try_new(CacheConfig::new("bad", 0, 60));
    /// assert!(matches!(result, Err(CacheError::InvalidConfig { field: "capacity", .. })));
    /// ```
    pub fn try_new(config: CacheConfig) -> CacheResult<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a new cache reading time from `clock`.
    ///
    /// # Example
    /// ```
    /// use lockfree_ttl_cache::{Cache, CacheConfig, ManualClock};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let clock = Arc::new(ManualClock::default());
    /// let cache = Cache::with_clock(CacheConfig::new("manual", 16, 10), clock.clone()).unwrap();
    ///
    /// cache.put("k", 1);
    /// clock.advance(Duration::from_secs(60));
    /// assert_eq!(cache.get("k"), None);
    /// ```
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> CacheResult<Self> {
        Self::with_hasher(config, clock, RandomState::new())
    }
}

impl<K, V, S> Cache<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Create a new cache with an explicit clock and hasher.
    pub fn with_hasher(config: CacheConfig, clock: Arc<dyn Clock>, hash_builder: S) -> CacheResult<Self> {
        let map = LruHashMap::with_hasher(config, clock, hash_builder)?;
        tracing::debug!(
            cache = %map.name(),
            capacity = map.capacity(),
            buckets = map.buckets.len(),
            "cache created"
        );
        Ok(Self { map: Arc::new(map) })
    }

    /// Get a value from the cache.
    ///
    /// Returns `None` if the key doesn't exist, has expired, or is being
    /// written at this instant. A hit refreshes the entry's recency.
    ///
    /// # Example
    /// ```
    /// use lockfree_ttl_cache::{Cache, CacheConfig};
    ///
    /// let cache = Cache::new(CacheConfig::new("example", 16, 60));
    /// cache.put("key", "value");
    ///
    /// match cache.get("key") {
    ///     Some(value) => println!("Found: {}", value),
    ///     None => println!("Not found"),
    /// }
    /// ```
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.map.get_with_now(key, self.map.now()).into_value()
    }

    /// Look up a key as of an explicit time, distinguishing expired entries
    /// from absent ones.
    ///
    /// # Example
    /// ```
    /// use lockfree_ttl_cache::{Cache, CacheConfig, Lookup};
    ///
    /// let cache = Cache::new(CacheConfig::new("example", 16, 60));
    /// cache.put("key", 7);
    ///
    /// let now = cache.now();
    /// assert_eq!(cache.get_with_now("key", now), Lookup::Hit(7));
    /// assert_eq!(cache.get_with_now("key", now + 3_600_000_000), Lookup::Expired);
    /// assert_eq!(cache.get_with_now("other", now), Lookup::Miss);
    /// ```
    pub fn get_with_now<Q>(&self, key: &Q, now: Timestamp) -> Lookup<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.map.get_with_now(key, now)
    }

    /// Store a value, replacing the current value of the key if any.
    ///
    /// Every put starts a fresh TTL for the key.
    ///
    /// # Example
    /// ```
    /// use lockfree_ttl_cache::{Cache, CacheConfig};
    ///
    /// let cache = Cache::new(CacheConfig::new("example", 16, 60));
    /// cache.put("key", 1);
    /// cache.put("key", 2);
    /// assert_eq!(cache.get("key"), Some(2));
    /// assert_eq!(cache.size(), 1);
    /// ```
    pub fn put(&self, key: K, value: V) {
        self.map.put(key, value);
    }

    /// Mark a key as expired.
    ///
    /// Returns `true` if the key held a live entry. The entry stays in the
    /// table, reading as expired, until the next eviction pass removes it.
    ///
    /// # Example
    /// ```
    /// use lockfree_ttl_cache::{Cache, CacheConfig};
    ///
    /// let cache = Cache::new(CacheConfig::new("example", 16, 60));
    /// cache.put("key", "value");
    /// assert!(cache.erase("key"));
    /// assert!(!cache.erase("key")); // Already erased
    /// assert_eq!(cache.get("key"), None);
    /// ```
    pub fn erase<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.erase(key)
    }

    /// Run one eviction pass now.
    ///
    /// Removes the least recently used entries above capacity, or entries
    /// that have outlived their TTL when under capacity. Removed entries and
    /// superseded values go back to the pools once no concurrent operation
    /// can still see them.
    ///
    /// # Example
    /// ```
    /// use lockfree_ttl_cache::{Cache, CacheConfig, ManualClock};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let clock = Arc::new(ManualClock::default());
    /// let cache = Cache::with_clock(CacheConfig::new("lru", 2, 60), clock.clone()).unwrap();
    /// for key in ["a", "b", "c"] {
    ///     cache.put(key, key.len());
    ///     clock.advance(Duration::from_millis(1));
    /// }
    ///
    /// let report = cache.evict();
    /// assert_eq!(report.unlinked, 1);
    /// assert_eq!(cache.get("a"), None);
    /// ```
    pub fn evict(&self) -> EvictionReport
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        self.map.evict()
    }

    /// Remove all entries from the cache.
    ///
    /// Entries being written at this instant are skipped. Returns the
    /// number of entries removed.
    ///
    /// # Example
    /// ```
    /// use lockfree_ttl_cache::{Cache, CacheConfig};
    ///
    /// let cache = Cache::new(CacheConfig::new("example", 16, 60));
    /// cache.put("key1", "value1");
    /// cache.put("key2", "value2");
    /// assert_eq!(cache.clear(), 2);
    /// assert!(cache.is_empty());
    /// ```
    pub fn clear(&self) -> usize
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        self.map.clear()
    }
}

impl<K, V, S> Cache<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Start a background thread that runs `evict` every
    /// `eviction_interval`. The thread stops when the returned `Evictor` is
    /// dropped.
    ///
    /// # Example
    /// ```
    /// use lockfree_ttl_cache::{Cache, CacheConfig};
    /// use std::time::Duration;
    ///
    /// let config = CacheConfig::new("background", 1024, 60)
    ///     .eviction_interval(Duration::from_millis(100));
    /// let cache: Cache<u64, u64> = Cache::new(config);
    ///
    /// let evictor = cache.spawn_evictor().unwrap();
    /// cache.put(1, 1);
    /// evictor.stop();
    /// ```
    pub fn spawn_evictor(&self) -> CacheResult<Evictor> {
        Evictor::spawn(Arc::clone(&self.map), self.map.eviction_interval())
    }
}

impl<K, V, S> Cache<K, V, S> {
    /// The name given in the configuration.
    pub fn name(&self) -> &str {
        self.map.name()
    }

    /// Get the number of entries in the cache.
    ///
    /// Includes expired and erased entries not yet removed by an eviction
    /// pass, and may exceed `capacity()` between passes.
    ///
    /// # Example
    /// ```
    /// use lockfree_ttl_cache::{Cache, CacheConfig};
    ///
    /// let cache = Cache::new(CacheConfig::new("example", 16, 60));
    /// assert_eq!(cache.size(), 0);
    /// cache.put("key", "value");
    /// assert_eq!(cache.size(), 1);
    /// ```
    pub fn size(&self) -> usize {
        self.map.size()
    }

    /// The target number of entries.
    pub fn capacity(&self) -> usize {
        self.map.capacity()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The current time of the cache's clock.
    pub fn now(&self) -> Timestamp {
        self.map.now()
    }

    /// Get a snapshot of the cache statistics.
    ///
    /// # Example
    /// ```
    /// use lockfree_ttl_cache::{Cache, CacheConfig};
    ///
    /// let cache = Cache::new(CacheConfig::new("example", 16, 60));
    /// cache.put("key", "value");
    /// let _ = cache.get("key");        // Hit
    /// let _ = cache.get("missing");    // Miss
    ///
    /// let stats = cache.stats();
    /// assert_eq!((stats.hits, stats.misses), (1, 1));
    /// ```
    pub fn stats(&self) -> StatsSnapshot {
        self.map.snapshot()
    }

    /// Get a reference to the internal statistics counter.
    ///
    /// This is useful for integrating with external metrics systems.
    pub fn stats_ref(&self) -> Arc<CacheStats> {
        self.map.stats()
    }
}

impl<K, V, S> Clone for Cache<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            map: Arc::clone(&self.map),
        }
    }
}

impl<K, V, S> fmt::Debug for Cache<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache").field("map", &self.map).finish()
    }
}
