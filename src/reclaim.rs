//! Deferred reclamation.
//!
//! Readers and writers never block and never free memory. Every operation
//! pins the global `crossbeam_epoch` collector for its whole duration.
//! Memory that has become unreachable (superseded value nodes, unlinked
//! nodes) is gathered into a batch by the evictor and handed to the
//! collector with `Guard::defer`; the collector runs the release only once
//! every guard pinned before the batch was detached has been dropped.
//!
//! Batches hold the pools and stats through `Arc`s, so a deferred release
//! may safely run after the table itself is gone.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_epoch::Guard;

use crate::entry::{Node, ValueNode};
use crate::pool::ObjectPool;
use crate::stats::CacheStats;

/// Lock-free intrusive stack of superseded value nodes.
pub(crate) struct RetireList<V> {
    head: AtomicPtr<ValueNode<V>>,
    len: AtomicUsize,
}

impl<V> RetireList<V> {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            len: AtomicUsize::new(0),
        }
    }

    /// Queue a value node that is no longer reachable from any `Node`.
    pub(crate) fn push(&self, node: *mut ValueNode<V>) {
        debug_assert!(!node.is_null());
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: the caller owns `node` exclusively once it has been
            // swapped out of its slot; readers never touch `retire_next`.
            unsafe { (*node).retire_next.store(head, Ordering::Relaxed) };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }
        self.len.fetch_add(1, Ordering::Relaxed);
    }

    /// Detach everything queued so far.
    pub(crate) fn take(&self) -> Retired<V> {
        let head = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        self.len.store(0, Ordering::Relaxed);
        Retired { head }
    }

    /// Approximate number of queued nodes.
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }
}

/// A detached batch of retired value nodes.
pub(crate) struct Retired<V> {
    head: *mut ValueNode<V>,
}

// SAFETY: a detached batch is reachable only through this handle.
unsafe impl<V: Send> Send for Retired<V> {}

impl<V> Retired<V> {
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Return every node of the batch to `pool`, returning the count.
    ///
    /// # Safety
    ///
    /// No thread may still hold a pointer to any node in the batch, i.e. the
    /// epoch must have advanced past every guard pinned before the batch was
    /// detached.
    pub(crate) unsafe fn release_into(self, pool: &ObjectPool<ValueNode<V>>) -> usize {
        let mut released = 0;
        let mut current = self.head;
        while !current.is_null() {
            let boxed = Box::from_raw(current);
            current = boxed.retire_next.load(Ordering::Relaxed);
            pool.release(boxed);
            released += 1;
        }
        released
    }
}

/// Nodes unlinked by one eviction pass or `clear`.
pub(crate) struct Unlinked<K, V> {
    nodes: Vec<NonNull<Node<K, V>>>,
}

// SAFETY: unlinked nodes are no longer reachable from the table; the batch
// owns them.
unsafe impl<K: Send, V: Send> Send for Unlinked<K, V> {}

impl<K, V> Unlinked<K, V> {
    pub(crate) fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub(crate) fn push(&mut self, node: NonNull<Node<K, V>>) {
        self.nodes.push(node);
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Return every node and its current value to the pools. Returns the
    /// number of value nodes released.
    ///
    /// # Safety
    ///
    /// Same contract as `Retired::release_into`.
    pub(crate) unsafe fn release_into(
        self,
        nodes: &ObjectPool<Node<K, V>>,
        values: &ObjectPool<ValueNode<V>>,
    ) -> usize {
        self.nodes
            .into_iter()
            .map(|node| release_node(nodes, values, Box::from_raw(node.as_ptr())))
            .sum()
    }
}

/// Return a node and its current value to the pools. Returns the number of
/// value nodes released (0 or 1).
pub(crate) fn release_node<K, V>(
    nodes: &ObjectPool<Node<K, V>>,
    values: &ObjectPool<ValueNode<V>>,
    mut node: Box<Node<K, V>>,
) -> usize {
    let value = std::mem::replace(node.value.get_mut(), ptr::null_mut());
    nodes.release(node);
    if value.is_null() {
        0
    } else {
        // SAFETY: the value belonged to the node being released, which is
        // unreachable.
        values.release(unsafe { Box::from_raw(value) });
        1
    }
}

/// Where deferred batches are released to.
pub(crate) struct Reclaimer<'a, K, V> {
    pub(crate) nodes: &'a Arc<ObjectPool<Node<K, V>>>,
    pub(crate) values: &'a Arc<ObjectPool<ValueNode<V>>>,
    pub(crate) stats: &'a Arc<CacheStats>,
}

impl<K, V> Reclaimer<'_, K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    /// Hand `values` and `unlinked` to the collector. Both batches must
    /// already be unreachable for any operation that pins after this call.
    pub(crate) fn retire(&self, guard: &Guard, values: Retired<V>, unlinked: Unlinked<K, V>) {
        if values.is_empty() && unlinked.is_empty() {
            return;
        }
        let nodes = Arc::clone(self.nodes);
        let pool = Arc::clone(self.values);
        let stats = Arc::clone(self.stats);
        let node_count = unlinked.len();

        guard.defer(move || {
            // SAFETY: the collector runs this only after every guard that
            // could have observed the batches has been dropped.
            let released =
                unsafe { values.release_into(&pool) + unlinked.release_into(&nodes, &pool) };
            stats.record_reclaimed(node_count as u64, released as u64);
        });
    }
}

/// Repeatedly flush the local epoch bag until `settled` holds, giving up
/// after a bounded number of rounds.
#[cfg(test)]
pub(crate) fn flush_until(mut settled: impl FnMut() -> bool) -> bool {
    for _ in 0..10_000 {
        if settled() {
            return true;
        }
        crossbeam_epoch::pin().flush();
        std::thread::yield_now();
    }
    settled()
}
