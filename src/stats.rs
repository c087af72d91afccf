//! Statistics for the cache.
//!
//! This module provides atomic counters for tracking cache operations.
//! Counters sit on separate cache lines so the hot read path does not
//! false-share with the write path.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// Statistics for cache operations.
///
/// All counters are relaxed atomics and can be read from any thread. Use
/// `Cache::stats()` to get a snapshot.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups that returned a value.
    hits: CachePadded<AtomicU64>,

    /// Lookups that found nothing, or found an entry mid-write.
    misses: CachePadded<AtomicU64>,

    /// Lookups that found an expired entry.
    expired: CachePadded<AtomicU64>,

    /// Puts that created a new node.
    inserts: CachePadded<AtomicU64>,

    /// Puts that replaced the value of an existing node.
    updates: CachePadded<AtomicU64>,

    /// Erase calls that marked a live entry stale.
    erases: CachePadded<AtomicU64>,

    /// Nodes unlinked by eviction passes.
    evictions: AtomicU64,

    /// Completed eviction passes.
    eviction_passes: AtomicU64,

    /// Nodes returned to the pool.
    reclaimed_nodes: AtomicU64,

    /// Value nodes returned to the pool.
    reclaimed_values: AtomicU64,
}

impl CacheStats {
    /// Create a new stats instance with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expired(&self) {
        self.expired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_erase(&self) {
        self.erases.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction_pass(&self) {
        self.eviction_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reclaimed(&self, nodes: u64, values: u64) {
        self.reclaimed_nodes.fetch_add(nodes, Ordering::Relaxed);
        self.reclaimed_values.fetch_add(values, Ordering::Relaxed);
    }

    // Getters for reading statistics

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn erases(&self) -> u64 {
        self.erases.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn eviction_passes(&self) -> u64 {
        self.eviction_passes.load(Ordering::Relaxed)
    }

    pub fn reclaimed_nodes(&self) -> u64 {
        self.reclaimed_nodes.load(Ordering::Relaxed)
    }

    pub fn reclaimed_values(&self) -> u64 {
        self.reclaimed_values.load(Ordering::Relaxed)
    }

    /// Calculate the hit rate as a percentage (0.0 to 100.0).
    /// Expired lookups count as misses. Returns 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses() + self.expired();
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    /// Create a snapshot of the counters together with the gauges the
    /// table owns (size and live pooled objects).
    pub(crate) fn snapshot(&self, size: u64, live_nodes: u64, live_values: u64) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            expired: self.expired(),
            inserts: self.inserts(),
            updates: self.updates(),
            erases: self.erases(),
            evictions: self.evictions(),
            eviction_passes: self.eviction_passes(),
            reclaimed_nodes: self.reclaimed_nodes(),
            reclaimed_values: self.reclaimed_values(),
            size,
            live_nodes,
            live_values,
            hit_rate: self.hit_rate(),
        }
    }
}

/// A point-in-time snapshot of cache statistics.
///
/// Unlike `CacheStats`, this struct contains plain values (not atomics)
/// and can be easily logged.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub inserts: u64,
    pub updates: u64,
    pub erases: u64,
    pub evictions: u64,
    pub eviction_passes: u64,
    pub reclaimed_nodes: u64,
    pub reclaimed_values: u64,
    /// Nodes currently linked into the table.
    pub size: u64,
    /// Nodes allocated and not yet returned to the pool.
    pub live_nodes: u64,
    /// Value nodes allocated and not yet returned to the pool.
    pub live_values: u64,
    pub hit_rate: f64,
}
