//! Bounded pool of fixed-capacity byte buffers.
//!
//! High request rates would otherwise allocate a fresh buffer per read;
//! the pool keeps up to `max` idle buffers around and hands them out
//! cleared. `acquire` never blocks: on a miss it allocates.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;

/// Free-list of fixed-capacity [`BytesMut`] buffers.
///
/// Ownership is exclusive: a buffer handed out by [`acquire`] belongs to
/// the caller until it is given back via [`release`]. Idle buffers belong
/// to the pool.
///
/// [`acquire`]: BufferPool::acquire
/// [`release`]: BufferPool::release
#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    max: usize,
    idle: Mutex<Vec<BytesMut>>,
    allocated: AtomicUsize,
}

impl BufferPool {
    /// Create a pool of buffers with `capacity` bytes each, retaining at
    /// most `max` idle buffers. Half of `max` is pre-allocated up front.
    #[must_use]
    pub fn new(capacity: usize, max: usize) -> Self {
        let prefill = max / 2;
        let mut idle = Vec::with_capacity(max);
        for _ in 0..prefill {
            idle.push(BytesMut::with_capacity(capacity));
        }
        Self {
            capacity,
            max,
            idle: Mutex::new(idle),
            allocated: AtomicUsize::new(prefill),
        }
    }

    /// Take a cleared buffer out of the pool, allocating when the idle
    /// list is empty.
    pub fn acquire(&self) -> BytesMut {
        let reused = self.idle.lock().pop();
        match reused {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(capacity = self.capacity, "buffer pool miss; allocating");
                BytesMut::with_capacity(self.capacity)
            }
        }
    }

    /// Return a buffer to the pool. `None` is a no-op. The buffer is
    /// cleared before it becomes reusable; if the pool already holds
    /// `max` idle buffers it is dropped instead.
    pub fn release(&self, buf: Option<BytesMut>) {
        let Some(mut buf) = buf else { return };
        buf.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.max {
            idle.push(buf);
        }
    }

    /// Number of idle buffers currently held.
    #[must_use]
    pub fn size(&self) -> usize {
        self.idle.lock().len()
    }

    /// Number of buffers allocated since construction (or the last
    /// [`clear`]), including the pre-allocated ones.
    ///
    /// [`clear`]: BufferPool::clear
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Per-buffer capacity in bytes.
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all idle buffers and reset the allocation counter.
    pub fn clear(&self) {
        self.idle.lock().clear();
        self.allocated.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefills_half_of_max() {
        let pool = BufferPool::new(8192, 4);
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.allocated_count(), 2);
    }

    #[test]
    fn acquire_release_reuses_the_same_buffer() {
        let pool = BufferPool::new(8192, 2);
        let buf = pool.acquire();
        let ptr = buf.as_ptr();
        pool.release(Some(buf));
        let buf = pool.acquire();
        assert_eq!(buf.as_ptr(), ptr);
    }

    #[test]
    fn acquired_buffer_is_cleared() {
        let pool = BufferPool::new(64, 2);
        let mut buf = pool.acquire();
        buf.extend_from_slice(b"leftover");
        pool.release(Some(buf));
        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 64);
    }

    #[test]
    fn size_never_exceeds_max() {
        let pool = BufferPool::new(1024, 2);
        let bufs: Vec<_> = (0..20).map(|_| pool.acquire()).collect();
        for buf in bufs {
            pool.release(Some(buf));
        }
        assert!(pool.size() <= 2);
    }

    #[test]
    fn release_none_is_a_noop() {
        let pool = BufferPool::new(1024, 2);
        let before = pool.size();
        pool.release(None);
        assert_eq!(pool.size(), before);
    }

    #[test]
    fn allocates_on_miss_without_blocking() {
        let pool = BufferPool::new(1024, 1);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.allocated_count(), 2);
        drop((a, b));
    }

    #[test]
    fn clear_drops_idle_and_resets_counter() {
        let pool = BufferPool::new(1024, 4);
        pool.clear();
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.allocated_count(), 0);
    }
}
