//! Per-type object pools.
//!
//! Nodes and value nodes are recycled through a bounded lock-free free list
//! so the write path does not hit the global allocator once the cache is
//! warm. Objects are cleared (`Recycle::recycle`) before they go back on the
//! list, and overwritten in place when handed out again.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::ArrayQueue;

/// Clear-before-reuse contract for pooled objects.
pub(crate) trait Recycle {
    /// Drop owned payloads and reset links.
    fn recycle(&mut self);
}

/// A bounded free list of boxed `T`s with a live-object counter.
pub(crate) struct ObjectPool<T> {
    free: ArrayQueue<Box<T>>,
    live: AtomicUsize,
}

impl<T: Recycle> ObjectPool<T> {
    /// Create a pool that keeps at most `capacity` idle objects.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
            live: AtomicUsize::new(0),
        }
    }

    /// Hand out an object initialized to `value`, reusing a pooled box if
    /// one is available.
    pub(crate) fn acquire(&self, value: T) -> Box<T> {
        self.live.fetch_add(1, Ordering::Relaxed);
        match self.free.pop() {
            Some(mut boxed) => {
                *boxed = value;
                boxed
            }
            None => Box::new(value),
        }
    }

    /// Return an object. It is recycled, then pooled or freed if the pool
    /// is full.
    pub(crate) fn release(&self, mut boxed: Box<T>) {
        boxed.recycle();
        self.live.fetch_sub(1, Ordering::Relaxed);
        // A full pool just drops the box.
        let _ = self.free.push(boxed);
    }

    /// Objects currently handed out.
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Idle objects waiting for reuse.
    pub(crate) fn idle(&self) -> usize {
        self.free.len()
    }

    #[cfg(test)]
    pub(crate) fn max_idle(&self) -> usize {
        self.free.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Slot {
        payload: Option<String>,
    }

    impl Recycle for Slot {
        fn recycle(&mut self) {
            self.payload = None;
        }
    }

    #[test]
    fn test_acquire_release_counts() {
        let pool = ObjectPool::new(4);
        let a = pool.acquire(Slot {
            payload: Some("a".into()),
        });
        let b = pool.acquire(Slot::default());
        assert_eq!(pool.live(), 2);
        assert_eq!(pool.idle(), 0);

        pool.release(a);
        pool.release(b);
        assert_eq!(pool.live(), 0);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_reuses_allocation() {
        let pool = ObjectPool::new(4);
        let first = pool.acquire(Slot {
            payload: Some("first".into()),
        });
        let addr = &*first as *const Slot;
        pool.release(first);

        let second = pool.acquire(Slot {
            payload: Some("second".into()),
        });
        assert_eq!(&*second as *const Slot, addr);
        assert_eq!(second.payload.as_deref(), Some("second"));
    }

    #[test]
    fn test_release_recycles() {
        let pool = ObjectPool::new(1);
        let slot = pool.acquire(Slot {
            payload: Some("x".into()),
        });
        pool.release(slot);

        let reused = pool.free.pop().unwrap();
        assert!(reused.payload.is_none());
    }

    #[test]
    fn test_full_pool_drops_overflow() {
        let pool = ObjectPool::new(1);
        let a = pool.acquire(Slot::default());
        let b = pool.acquire(Slot::default());
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.live(), 0);
    }
}
