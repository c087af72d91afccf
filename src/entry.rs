//! Cache entries: the `Node`/`ValueNode` pair and the entry state machine.
//!
//! A `Node` is the identity of a key inside a bucket chain. Its `state` word
//! is both a tiny lock and a recency clock:
//!
//! ```text
//!   0  Tombstone   unlinked by the evictor, waiting for reclamation
//!   1  Expired     value is stale, node still linked
//!   2  Locked      one writer is installing a new value
//!  >2  Touched(ts) valid, last read or written at `ts`
//! ```
//!
//! Transitions:
//!
//! ```text
//!   Touched --CAS--> Locked --CAS--> Touched'     (writer)
//!   Expired --CAS--> Locked --CAS--> Touched'     (writer resurrects)
//!   Touched --CAS--> Expired                      (lapsed read, erase)
//!   Touched | Expired --CAS--> Tombstone          (evictor only)
//! ```
//!
//! A `ValueNode` holds one value and its jittered deadline. Superseded
//! value nodes are threaded onto a retirement list through `retire_next`.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use rand::Rng;

use crate::clock::{Timestamp, MIN_TIMESTAMP};
use crate::pool::Recycle;

const TOMBSTONE: u64 = 0;
const EXPIRED: u64 = 1;
const LOCKED: u64 = 2;

/// Decoded view of a node's state word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    Tombstone,
    Expired,
    Locked,
    Touched(Timestamp),
}

impl EntryState {
    #[inline]
    pub(crate) fn from_raw(raw: u64) -> Self {
        match raw {
            TOMBSTONE => EntryState::Tombstone,
            EXPIRED => EntryState::Expired,
            LOCKED => EntryState::Locked,
            ts => EntryState::Touched(ts),
        }
    }

    #[inline]
    pub(crate) fn into_raw(self) -> u64 {
        match self {
            EntryState::Tombstone => TOMBSTONE,
            EntryState::Expired => EXPIRED,
            EntryState::Locked => LOCKED,
            EntryState::Touched(ts) => {
                debug_assert!(ts >= MIN_TIMESTAMP);
                ts
            }
        }
    }
}

/// Outcome of a writer trying to claim a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    /// The caller now holds the node's write lock.
    Acquired,
    /// Another writer holds the lock.
    Busy,
    /// The node has been tombstoned by the evictor.
    Gone,
}

/// One key tracked by the table.
pub(crate) struct Node<K, V> {
    /// `None` only while the node sits idle in its pool.
    key: Option<K>,
    /// Next node in the bucket chain. Only the evictor rewrites a linked
    /// node's `next`; writers set it once before publishing.
    pub(crate) next: AtomicPtr<Node<K, V>>,
    /// Current value. Never null while the node is linked.
    pub(crate) value: AtomicPtr<ValueNode<V>>,
    state: AtomicU64,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(key: K, value: *mut ValueNode<V>, now: Timestamp) -> Self {
        Self {
            key: Some(key),
            next: AtomicPtr::new(ptr::null_mut()),
            value: AtomicPtr::new(value),
            state: AtomicU64::new(EntryState::Touched(now).into_raw()),
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    #[inline]
    pub(crate) fn state(&self) -> EntryState {
        EntryState::from_raw(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn transition(&self, from: EntryState, to: EntryState) -> bool {
        self.state
            .compare_exchange(
                from.into_raw(),
                to.into_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Try to take the write lock from any unlocked, linked state.
    pub(crate) fn try_lock(&self) -> Claim {
        loop {
            let observed = self.state();
            match observed {
                EntryState::Locked => return Claim::Busy,
                EntryState::Tombstone => return Claim::Gone,
                _ if self.transition(observed, EntryState::Locked) => return Claim::Acquired,
                _ => continue,
            }
        }
    }

    /// Release the write lock, stamping the node with `now`.
    pub(crate) fn unlock(&self, now: Timestamp) {
        let released = self.transition(EntryState::Locked, EntryState::Touched(now));
        debug_assert!(released, "write lock released by a non-owner");
    }

    /// Swap in a new value, returning the displaced one. Caller holds the lock.
    pub(crate) fn install(&self, value: *mut ValueNode<V>) -> *mut ValueNode<V> {
        self.value.swap(value, Ordering::AcqRel)
    }

    /// Best-effort recency refresh. Never moves the clock backwards.
    pub(crate) fn touch(&self, observed: Timestamp, now: Timestamp) -> bool {
        now > observed && self.transition(EntryState::Touched(observed), EntryState::Touched(now))
    }

    /// Mark a valid node stale. Fails if the state moved since `observed`.
    pub(crate) fn expire(&self, observed: Timestamp) -> bool {
        self.transition(EntryState::Touched(observed), EntryState::Expired)
    }

    /// Terminal transition taken by the evictor before unlinking.
    pub(crate) fn tombstone(&self, observed: EntryState) -> bool {
        matches!(observed, EntryState::Touched(_) | EntryState::Expired)
            && self.transition(observed, EntryState::Tombstone)
    }
}

impl<K, V> Recycle for Node<K, V> {
    fn recycle(&mut self) {
        self.key = None;
        *self.next.get_mut() = ptr::null_mut();
        *self.value.get_mut() = ptr::null_mut();
        *self.state.get_mut() = TOMBSTONE;
    }
}

/// One value of a key, with its expiry.
pub(crate) struct ValueNode<V> {
    value: Option<V>,
    deadline: Timestamp,
    /// Link used only while queued for reclamation.
    pub(crate) retire_next: AtomicPtr<ValueNode<V>>,
}

impl<V> ValueNode<V> {
    pub(crate) fn new(value: V, deadline: Timestamp) -> Self {
        Self {
            value: Some(value),
            deadline,
            retire_next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[inline]
    pub(crate) fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    #[inline]
    pub(crate) fn is_live(&self, now: Timestamp) -> bool {
        self.deadline > now
    }

    #[cfg(test)]
    pub(crate) fn deadline(&self) -> Timestamp {
        self.deadline
    }
}

impl<V> Recycle for ValueNode<V> {
    fn recycle(&mut self) {
        self.value = None;
        *self.retire_next.get_mut() = ptr::null_mut();
    }
}

/// TTL with logarithmic jitter.
///
/// Deadlines are spread over `ln(ttl_secs)` seconds centred on the TTL so
/// that entries written together do not all expire together.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Ttl {
    ttl_us: u64,
    spread_us: u64,
}

impl Ttl {
    pub(crate) fn from_secs(secs: u64) -> Self {
        let spread_us = ((secs as f64).ln().max(0.0) * 1_000_000.0) as u64;
        Self {
            ttl_us: secs.saturating_mul(1_000_000),
            spread_us,
        }
    }

    /// Absolute deadline for a value written at `now`.
    pub(crate) fn deadline(&self, now: Timestamp) -> Timestamp {
        let jitter = if self.spread_us == 0 {
            0
        } else {
            rand::rng().random_range(0..self.spread_us)
        };
        now.saturating_add(self.ttl_us)
            .saturating_add(jitter)
            .saturating_sub(self.spread_us / 2)
    }

    /// Longest a value can stay live after its write.
    pub(crate) fn max_lifetime(&self) -> u64 {
        self.ttl_us.saturating_add(self.spread_us / 2)
    }

    #[cfg(test)]
    pub(crate) fn spread(&self) -> u64 {
        self.spread_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn node(now: Timestamp) -> Node<&'static str, u32> {
        Node::new("key", ptr::null_mut(), now)
    }

    #[test]
    fn test_new_node_is_touched() {
        let node = node(100);
        assert_eq!(node.state(), EntryState::Touched(100));
    }

    #[test]
    fn test_lock_and_unlock() {
        let node = node(100);
        assert_eq!(node.try_lock(), Claim::Acquired);
        assert_eq!(node.state(), EntryState::Locked);
        assert_eq!(node.try_lock(), Claim::Busy);

        node.unlock(200);
        assert_eq!(node.state(), EntryState::Touched(200));
    }

    #[test]
    fn test_expired_node_can_be_resurrected() {
        let node = node(100);
        assert!(node.expire(100));
        assert_eq!(node.state(), EntryState::Expired);

        assert_eq!(node.try_lock(), Claim::Acquired);
        node.unlock(300);
        assert_eq!(node.state(), EntryState::Touched(300));
    }

    #[test]
    fn test_touch_is_best_effort() {
        let node = node(100);
        assert!(node.touch(100, 150));
        // Stale observation loses the race.
        assert!(!node.touch(100, 200));
        // Never moves backwards.
        assert!(!node.touch(150, 120));
        assert_eq!(node.state(), EntryState::Touched(150));
    }

    #[test]
    fn test_tombstone_is_terminal() {
        let node = node(100);
        assert!(node.tombstone(EntryState::Touched(100)));
        assert_eq!(node.try_lock(), Claim::Gone);
        assert!(!node.expire(100));
        assert!(!node.tombstone(EntryState::Tombstone));
    }

    #[test]
    fn test_locked_node_cannot_be_tombstoned() {
        let node = node(100);
        assert_eq!(node.try_lock(), Claim::Acquired);
        assert!(!node.tombstone(EntryState::Locked));
    }

    #[test]
    fn test_recycle_clears_links() {
        let mut value = ValueNode::new(7u32, 10);
        value.recycle();
        assert!(value.value().is_none());

        let mut node = node(100);
        node.recycle();
        assert_eq!(node.state(), EntryState::Tombstone);
        assert!(node.value.load(Ordering::Relaxed).is_null());
        assert!(node.key().is_none());
    }

    #[test]
    fn test_recycle_drops_key() {
        let key = std::sync::Arc::new("shared".to_string());
        let mut node: Node<_, u32> = Node::new(key.clone(), ptr::null_mut(), 100);
        assert_eq!(std::sync::Arc::strong_count(&key), 2);
        node.recycle();
        assert_eq!(std::sync::Arc::strong_count(&key), 1);
    }

    #[test]
    fn test_value_liveness() {
        let value = ValueNode::new("v", 1_000);
        assert_eq!(value.deadline(), 1_000);
        assert!(value.is_live(999));
        assert!(!value.is_live(1_000));
    }

    #[test]
    fn test_ttl_spread_scales_with_log() {
        let short = Ttl::from_secs(10);
        let long = Ttl::from_secs(3600);
        assert!(short.spread() > 0);
        assert!(long.spread() > short.spread());
        assert!(long.spread() < 3600 * 1_000_000 / 100);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let ttl = Ttl::from_secs(u64::MAX);
        assert_eq!(ttl.max_lifetime(), u64::MAX);
        assert_eq!(ttl.deadline(1_000), u64::MAX - ttl.spread() / 2);
    }

    proptest! {
        #[test]
        fn prop_deadline_within_jitter(ttl in 4u64..100_000, now in 3u64..1_000_000_000_000) {
            let ttl = Ttl::from_secs(ttl);
            let deadline = ttl.deadline(now);
            let base = now + ttl.ttl_us;
            prop_assert!(deadline + ttl.spread_us / 2 >= base);
            prop_assert!(deadline < base + ttl.spread_us / 2 + 1);
            // Always readable at half the TTL, always gone by twice the TTL.
            prop_assert!(deadline > now + ttl.ttl_us / 2);
            prop_assert!(deadline <= now + 2 * ttl.ttl_us);
        }

        #[test]
        fn prop_timestamps_decode_as_touched(ts in MIN_TIMESTAMP..u64::MAX) {
            prop_assert_eq!(EntryState::from_raw(ts), EntryState::Touched(ts));
        }
    }
}
