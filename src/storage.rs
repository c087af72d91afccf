//! The lock-free bucket table.
//!
//! `LruHashMap` is a fixed array of bucket heads, each the start of a
//! singly-linked chain of nodes. Writers only ever prepend to a chain (CAS on
//! the bucket head); only the evictor unlinks. Lookups walk chains without
//! taking locks and refresh the recency timestamp with a single CAS attempt.
//!
//! Every operation runs pinned to the epoch collector so that memory the
//! evictor retires is freed only once no operation can reach it (see
//! `reclaim`).

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ahash::RandomState;
use crossbeam_epoch as epoch;
use crossbeam_utils::Backoff;

use crate::clock::{Clock, Timestamp};
use crate::config::CacheConfig;
use crate::entry::{Claim, EntryState, Node, Ttl, ValueNode};
use crate::error::CacheResult;
use crate::pool::ObjectPool;
use crate::reclaim::{self, Reclaimer, RetireList};
use crate::stats::{CacheStats, StatsSnapshot};

/// Result of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// The key maps to a live value.
    Hit(V),
    /// The key is present but its value has expired (or was erased).
    Expired,
    /// The key is absent, or its entry is being written or removed.
    Miss,
}

impl<V> Lookup<V> {
    /// The value, if this was a hit.
    pub fn into_value(self) -> Option<V> {
        match self {
            Lookup::Hit(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Lookup::Expired)
    }
}

/// Upper bound on idle objects kept by each pool. Above this, released
/// objects go back to the allocator.
const MAX_IDLE_OBJECTS: usize = 4096;

/// Lock-free TTL hash map with approximate LRU eviction.
///
/// This is the internal implementation; users should use `Cache` instead.
pub(crate) struct LruHashMap<K, V, S = RandomState> {
    pub(crate) name: String,
    pub(crate) capacity: usize,
    pub(crate) ttl: Ttl,
    pub(crate) tolerance_us: u64,
    max_pending_updates: u32,
    eviction_interval: Duration,
    pub(crate) buckets: Box<[AtomicPtr<Node<K, V>>]>,
    hash_builder: S,
    /// Linked nodes. Signed because an unlink can be counted before the
    /// matching insert.
    pub(crate) node_count: AtomicIsize,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) nodes: Arc<ObjectPool<Node<K, V>>>,
    pub(crate) values: Arc<ObjectPool<ValueNode<V>>>,
    /// Value nodes superseded since the last eviction pass.
    pub(crate) pending: RetireList<V>,
    /// Serializes eviction passes and `clear`.
    maintenance: Mutex<()>,
    pub(crate) stats: Arc<CacheStats>,
}

// SAFETY: nodes and value nodes are shared between threads through atomic
// pointers; keys are read concurrently (`Sync`) and values are cloned out
// to other threads (`Send + Sync`).
unsafe impl<K: Send + Sync, V: Send + Sync, S: Send> Send for LruHashMap<K, V, S> {}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Sync> Sync for LruHashMap<K, V, S> {}

/// Outcome of trying to update an existing entry in place.
enum Update {
    Installed,
    Busy,
    Absent,
}

/// Spin-then-yield policy for writers losing races.
struct Contention {
    backoff: Backoff,
    attempts: u32,
    limit: u32,
}

impl Contention {
    fn new(limit: u32) -> Self {
        Self {
            backoff: Backoff::new(),
            attempts: 0,
            limit,
        }
    }

    fn wait(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.limit {
            self.backoff.snooze();
        } else {
            self.backoff.spin();
        }
    }
}

impl<K, V, S> LruHashMap<K, V, S> {
    /// Create a table with an explicit hasher.
    pub(crate) fn with_hasher(
        config: CacheConfig,
        clock: Arc<dyn Clock>,
        hash_builder: S,
    ) -> CacheResult<Self> {
        config.validate()?;

        let bucket_count = config.get_bucket_count();
        let buckets = (0..bucket_count)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            ttl: Ttl::from_secs(config.ttl_secs),
            tolerance_us: u64::from(config.eviction_tolerance_secs) * 1_000_000,
            max_pending_updates: config.max_pending_updates,
            eviction_interval: config.eviction_interval,
            nodes: Arc::new(ObjectPool::new(config.capacity.min(MAX_IDLE_OBJECTS))),
            values: Arc::new(ObjectPool::new(config.capacity.min(MAX_IDLE_OBJECTS))),
            capacity: config.capacity,
            name: config.name,
            buckets,
            hash_builder,
            node_count: AtomicIsize::new(0),
            clock,
            pending: RetireList::new(),
            maintenance: Mutex::new(()),
            stats: Arc::new(CacheStats::new()),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Number of linked nodes. May exceed capacity between eviction passes.
    pub(crate) fn size(&self) -> usize {
        self.node_count.load(Ordering::Relaxed).max(0) as usize
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub(crate) fn eviction_interval(&self) -> Duration {
        self.eviction_interval
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(crate) fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(
            self.size() as u64,
            self.nodes.live() as u64,
            self.values.live() as u64,
        )
    }

    /// Superseded values waiting for the next eviction pass.
    pub(crate) fn pending_values(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn lock_maintenance(&self) -> MutexGuard<'_, ()> {
        self.maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn reclaimer(&self) -> Reclaimer<'_, K, V> {
        Reclaimer {
            nodes: &self.nodes,
            values: &self.values,
            stats: &self.stats,
        }
    }
}

impl<K, V, S> LruHashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    fn bucket<Q>(&self, key: &Q) -> &AtomicPtr<Node<K, V>>
    where
        Q: Hash + ?Sized,
    {
        let index = self.hash_builder.hash_one(key) % self.buckets.len() as u64;
        &self.buckets[index as usize]
    }

    /// Walk a chain from `current` for the first node holding `key`.
    ///
    /// Callers must be pinned; the returned reference is valid until their
    /// guard drops.
    fn find_from<Q>(&self, mut current: *mut Node<K, V>, key: &Q) -> Option<&Node<K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        // SAFETY: nodes reachable from a bucket head are freed only by a
        // deferred release that our guard holds back.
        while let Some(node) = unsafe { current.as_ref() } {
            if node.key().is_some_and(|k| k.borrow() == key) {
                return Some(node);
            }
            current = node.next.load(Ordering::Acquire);
        }
        None
    }

    /// Look up `key` as of `now`, refreshing its recency on a hit.
    pub(crate) fn get_with_now<Q>(&self, key: &Q, now: Timestamp) -> Lookup<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let _guard = epoch::pin();
        let lookup = self.lookup(key, now);
        match lookup {
            Lookup::Hit(_) => self.stats.record_hit(),
            Lookup::Expired => self.stats.record_expired(),
            Lookup::Miss => self.stats.record_miss(),
        }
        lookup
    }

    fn lookup<Q>(&self, key: &Q, now: Timestamp) -> Lookup<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let head = self.bucket(key).load(Ordering::Acquire);
        let Some(node) = self.find_from(head, key) else {
            return Lookup::Miss;
        };

        match node.state() {
            EntryState::Touched(ts) => {
                let value = node.value.load(Ordering::Acquire);
                // SAFETY: superseded values are freed by deferred release.
                let Some(value) = (unsafe { value.as_ref() }) else {
                    return Lookup::Miss;
                };
                if value.is_live(now) {
                    node.touch(ts, now);
                    value.value().cloned().map_or(Lookup::Miss, Lookup::Hit)
                } else {
                    node.expire(ts);
                    Lookup::Expired
                }
            }
            EntryState::Expired => Lookup::Expired,
            EntryState::Locked | EntryState::Tombstone => Lookup::Miss,
        }
    }

    /// Install `value` as the current value of `key`.
    ///
    /// Returns once this call's own claim or prepend has succeeded; losing a
    /// race to another writer means trying again, not giving up.
    pub(crate) fn put(&self, key: K, value: V) {
        let _guard = epoch::pin();
        let now = self.clock.now();
        let bucket = self.bucket(&key);
        let fresh = Box::into_raw(
            self.values
                .acquire(ValueNode::new(value, self.ttl.deadline(now))),
        );
        let mut contention = Contention::new(self.max_pending_updates);

        // Update in place while the key is linked.
        let mut head = bucket.load(Ordering::Acquire);
        loop {
            match self.try_update(head, &key, fresh) {
                Update::Installed => return,
                Update::Busy => {
                    contention.wait();
                    head = bucket.load(Ordering::Acquire);
                }
                Update::Absent => break,
            }
        }

        // Prepend a new node, rescanning whenever the head moves under us.
        let node = Box::into_raw(self.nodes.acquire(Node::new(key, fresh, now)));
        let mut rescan = false;
        loop {
            if rescan {
                // SAFETY: `node` is unpublished and owned by this call.
                let pending = unsafe { &*node };
                let update = match pending.key() {
                    Some(key) => self.try_update(head, key, fresh),
                    None => Update::Absent,
                };
                match update {
                    Update::Installed => {
                        // Another writer created the key first; our node was
                        // never visible to anyone.
                        self.nodes.release(unsafe { Box::from_raw(node) });
                        return;
                    }
                    Update::Busy => {
                        contention.wait();
                        head = bucket.load(Ordering::Acquire);
                        continue;
                    }
                    Update::Absent => {}
                }
            }

            // SAFETY: as above, `node` is not yet shared.
            unsafe { (*node).next.store(head, Ordering::Relaxed) };
            match bucket.compare_exchange(head, node, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    self.node_count.fetch_add(1, Ordering::Relaxed);
                    self.stats.record_insert();
                    return;
                }
                Err(current) => {
                    head = current;
                    rescan = true;
                    contention.wait();
                }
            }
        }
    }

    /// Claim the node for `key` reachable from `head` and swap in `fresh`.
    fn try_update(&self, head: *mut Node<K, V>, key: &K, fresh: *mut ValueNode<V>) -> Update {
        let Some(node) = self.find_from(head, key) else {
            return Update::Absent;
        };

        match node.try_lock() {
            Claim::Acquired => {
                let displaced = node.install(fresh);
                if !displaced.is_null() {
                    self.pending.push(displaced);
                }
                node.unlock(self.clock.now());
                self.stats.record_update();
                Update::Installed
            }
            Claim::Busy => Update::Busy,
            // Being unlinked; a fresh node takes its place.
            Claim::Gone => Update::Absent,
        }
    }

    /// Mark `key` stale without unlinking it. Returns `true` if this call
    /// expired a live entry.
    pub(crate) fn erase<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let _guard = epoch::pin();
        let head = self.bucket(key).load(Ordering::Acquire);
        let Some(node) = self.find_from(head, key) else {
            return false;
        };

        loop {
            match node.state() {
                EntryState::Touched(ts) => {
                    if node.expire(ts) {
                        self.stats.record_erase();
                        return true;
                    }
                }
                EntryState::Expired | EntryState::Locked | EntryState::Tombstone => {
                    return false
                }
            }
        }
    }
}

impl<K, V, S> fmt::Debug for LruHashMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruHashMap")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("buckets", &self.buckets.len())
            .field("size", &self.size())
            .field("pending_values", &self.pending_values())
            .field("idle_nodes", &self.nodes.idle())
            .field("idle_values", &self.values.idle())
            .finish()
    }
}

impl<K, V, S> Drop for LruHashMap<K, V, S> {
    fn drop(&mut self) {
        for index in 0..self.buckets.len() {
            let mut current = self.buckets[index].swap(ptr::null_mut(), Ordering::Relaxed);
            while !current.is_null() {
                // SAFETY: `&mut self` rules out concurrent readers; every
                // linked node is owned by the table.
                let mut node = unsafe { Box::from_raw(current) };
                current = *node.next.get_mut();
                reclaim::release_node(&self.nodes, &self.values, node);
            }
        }

        // Unlinked nodes belong to their deferred batches, which hold their
        // own `Arc`s to the pools.
        // SAFETY: no operation can be in flight during drop.
        unsafe { self.pending.take().release_into(&self.values) };
    }
}
