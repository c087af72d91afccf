//! The eviction pass.
//!
//! Run periodically by a single maintenance actor. Each pass:
//!
//! 1. detaches every value superseded since the last pass;
//! 2. takes a census of the recency word of every node that is not locked;
//! 3. picks a threshold: enough of the oldest entries to get back to
//!    capacity, or everything that has certainly outlived its TTL;
//! 4. tombstones and unlinks entries below the threshold;
//! 5. hands the detached values and unlinked nodes to the epoch collector,
//!    which returns them to the pools once no operation can reach them.
//!
//! Recency is approximate: the census is a snapshot and entries touched
//! while the pass runs are simply skipped when their CAS fails.

use std::hash::{BuildHasher, Hash};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_epoch as epoch;

use crate::clock::Timestamp;
use crate::entry::{EntryState, Node};
use crate::reclaim::Unlinked;
use crate::storage::LruHashMap;

/// What one eviction pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Superseded value nodes handed to the collector by this pass.
    pub retired_values: usize,
    /// Entries seen by the census.
    pub censused: usize,
    /// Entries unlinked by this pass. Their memory is handed to the
    /// collector along with the superseded values.
    pub unlinked: usize,
    /// Exclusive upper bound of evicted recency stamps, if the pass evicted.
    pub threshold: Option<Timestamp>,
}

/// Eviction cut computed from a sorted census.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Threshold {
    /// Entries stamped strictly below this are evicted.
    pub(crate) bound: Timestamp,
    /// Additional entries stamped exactly `bound` that may be evicted so
    /// that equal stamps cannot block convergence to capacity.
    pub(crate) ties: usize,
}

impl Threshold {
    /// Plan a cut over `census` (sorted ascending).
    ///
    /// Over capacity, the cut sits at rank `len - capacity`. At or under
    /// capacity, the pass is skipped unless some entry is older than
    /// `stale_bound`; if one is, every entry at or below `stale_bound` goes.
    pub(crate) fn plan(census: &[Timestamp], capacity: usize, stale_bound: Timestamp) -> Option<Self> {
        let oldest = *census.first()?;
        let stale = Self {
            bound: stale_bound.saturating_add(1),
            ties: 0,
        };

        if census.len() > capacity {
            let excess = census.len() - capacity;
            let rank = census[excess];
            if stale_bound >= rank {
                return Some(stale);
            }
            let below = census.partition_point(|&stamp| stamp < rank);
            Some(Self {
                bound: rank,
                ties: excess - below,
            })
        } else if oldest < stale_bound {
            Some(stale)
        } else {
            None
        }
    }

    fn selector(self) -> impl FnMut(Timestamp) -> bool {
        let mut ties = self.ties;
        move |stamp| {
            if stamp < self.bound {
                true
            } else if stamp == self.bound && ties > 0 {
                ties -= 1;
                true
            } else {
                false
            }
        }
    }
}

impl<K, V, S> LruHashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Run one eviction pass.
    ///
    /// Serialized with `clear` and with itself; never blocks readers or
    /// writers.
    pub(crate) fn evict(&self) -> EvictionReport
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        let _maintenance = self.lock_maintenance();
        let guard = epoch::pin();

        let retired_values = self.pending.len();
        let staged = self.pending.take();

        let now = self.clock.now();
        let census = self.census();
        let threshold = Threshold::plan(&census, self.capacity, self.stale_bound(now));

        // Tombstoned nodes left linked are unlinked even when the pass
        // skips eviction.
        let mut cut = threshold.map(Threshold::selector);
        let mut unlinked = Unlinked::new();
        self.unlink_where(
            |stamp| cut.as_mut().is_some_and(|select| select(stamp)),
            &mut unlinked,
        );
        let count = unlinked.len();
        self.node_count.fetch_sub(count as isize, Ordering::Relaxed);

        self.reclaimer().retire(&guard, staged, unlinked);
        guard.flush();

        self.stats.record_eviction_pass();
        self.stats.record_evictions(count as u64);

        let report = EvictionReport {
            retired_values,
            censused: census.len(),
            unlinked: count,
            threshold: threshold.map(|t| t.bound),
        };

        match report.threshold {
            Some(bound) => tracing::debug!(
                cache = %self.name,
                retired_values,
                censused = report.censused,
                unlinked = count,
                threshold = bound,
                oldest = census.first().copied().unwrap_or_default(),
                newest = census.last().copied().unwrap_or_default(),
                size = self.size(),
                "eviction pass"
            ),
            None => tracing::trace!(
                cache = %self.name,
                retired_values,
                censused = report.censused,
                unlinked = count,
                "eviction pass skipped, nothing stale"
            ),
        }

        report
    }

    /// Unlink every entry that is not mid-write and retire it along with
    /// the superseded values. Returns the number unlinked.
    pub(crate) fn clear(&self) -> usize
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        let _maintenance = self.lock_maintenance();
        let guard = epoch::pin();

        let staged = self.pending.take();
        let mut unlinked = Unlinked::new();
        self.unlink_where(|_| true, &mut unlinked);
        let count = unlinked.len();
        self.node_count.fetch_sub(count as isize, Ordering::Relaxed);

        self.reclaimer().retire(&guard, staged, unlinked);
        guard.flush();

        tracing::debug!(cache = %self.name, unlinked = count, "cleared");
        count
    }

    /// Recency words of every linked node that is not locked, sorted.
    fn census(&self) -> Vec<Timestamp> {
        let mut census = Vec::with_capacity(self.size() + self.size() / 8);
        for bucket in self.buckets.iter() {
            let mut current = bucket.load(Ordering::Acquire);
            // SAFETY: the caller is pinned, and only this thread retires nodes.
            while let Some(node) = unsafe { current.as_ref() } {
                match node.state() {
                    state @ (EntryState::Touched(_) | EntryState::Expired) => {
                        census.push(state.into_raw())
                    }
                    EntryState::Locked | EntryState::Tombstone => {}
                }
                current = node.next.load(Ordering::Acquire);
            }
        }
        census.sort_unstable();
        census
    }

    /// Entries untouched since before this cannot hold a live value.
    fn stale_bound(&self, now: Timestamp) -> Timestamp {
        let horizon = self.ttl.max_lifetime().saturating_add(self.tolerance_us);
        // Expired entries (1) always fall below the bound.
        now.saturating_sub(horizon)
            .max(EntryState::Locked.into_raw())
    }

    /// Tombstone and unlink every entry whose recency word `select`s,
    /// pushing unlinked nodes onto `retired`. Nodes found already
    /// tombstoned are unlinked as well.
    fn unlink_where(&self, mut select: impl FnMut(Timestamp) -> bool, retired: &mut Unlinked<K, V>) {
        for bucket in self.buckets.iter() {
            let mut prev: *mut Node<K, V> = ptr::null_mut();
            let mut current = bucket.load(Ordering::Acquire);

            while let Some(node) = NonNull::new(current) {
                // SAFETY: only this thread unlinks nodes, and the caller's
                // guard keeps retired ones alive.
                let node_ref = unsafe { node.as_ref() };
                let next = node_ref.next.load(Ordering::Acquire);
                let state = node_ref.state();

                // A failed tombstone CAS means the entry was touched or
                // rewritten since; it survives this pass.
                let doomed = match state {
                    EntryState::Touched(_) | EntryState::Expired => {
                        select(state.into_raw()) && node_ref.tombstone(state)
                    }
                    EntryState::Tombstone => true,
                    EntryState::Locked => false,
                };

                if doomed {
                    prev = Self::unlink(bucket, prev, node.as_ptr(), next);
                    retired.push(node);
                } else {
                    prev = node.as_ptr();
                }
                current = next;
            }
        }
    }

    /// Splice `node` out of `bucket`, returning the node now preceding
    /// `next` (null if `next` is the head).
    fn unlink(
        bucket: &AtomicPtr<Node<K, V>>,
        prev: *mut Node<K, V>,
        node: *mut Node<K, V>,
        next: *mut Node<K, V>,
    ) -> *mut Node<K, V> {
        if prev.is_null() {
            match bucket.compare_exchange(node, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return ptr::null_mut(),
                Err(head) => {
                    // Writers prepended in the meantime; `node` is now
                    // somewhere below the new head.
                    let mut pred = head;
                    // SAFETY: the new head chain leads to `node`, and the
                    // pass is pinned.
                    unsafe {
                        loop {
                            let after = (*pred).next.load(Ordering::Acquire);
                            if after == node {
                                break;
                            }
                            pred = after;
                        }
                        (*pred).next.store(next, Ordering::Release);
                    }
                    return pred;
                }
            }
        }

        // SAFETY: `prev` is a linked node this pass kept.
        unsafe { (*prev).next.store(next, Ordering::Release) };
        prev
    }
}
