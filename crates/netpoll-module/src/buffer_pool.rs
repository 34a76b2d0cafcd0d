//! `BufferPool` - shared supply of `Buffer`s for connections.
//!
//! Each connection checks out two buffers when it opens and hands them back
//! at teardown. Returned buffers are cleared and kept on a bounded lock-free
//! free list; once the list is full, extra buffers are simply dropped. So
//! are buffers that grew past `RETAIN_FACTOR` times the configured size, so
//! one large frame does not pin its storage in the pool.

use netpoll_core::buffer::Buffer;

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returned buffers larger than `RETAIN_FACTOR * buffer_size` are freed.
pub const RETAIN_FACTOR: usize = 16;

pub struct BufferPool {
    free: ArrayQueue<Buffer>,
    /// Initial capacity of freshly allocated buffers.
    buffer_size: usize,
    /// Buffers currently checked out (for diagnostics).
    in_use: AtomicUsize,
    /// Fresh allocations over the pool's lifetime (for diagnostics).
    allocated: AtomicUsize,
}

impl BufferPool {
    /// Pool keeping up to `capacity` idle buffers of `buffer_size` bytes.
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
            buffer_size,
            in_use: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Take an idle buffer, or allocate one if none is free.
    pub fn acquire(&self) -> Buffer {
        self.in_use.fetch_add(1, Ordering::Relaxed);
        match self.free.pop() {
            Some(buf) => buf,
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Buffer::with_capacity(self.buffer_size)
            }
        }
    }

    /// Return `buf`. Unread bytes are discarded.
    pub fn release(&self, mut buf: Buffer) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        if buf.capacity() > self.retain_limit() {
            return;
        }
        buf.clear();
        // Full free list: let it drop
        let _ = self.free.push(buf);
    }

    /// Largest capacity a returned buffer may have and still be kept.
    #[inline]
    pub fn retain_limit(&self) -> usize {
        self.buffer_size.max(1).saturating_mul(RETAIN_FACTOR)
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Idle buffers ready for reuse.
    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(1024, 4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_reuses() {
        let pool = BufferPool::new(4, 128);

        let mut buf = pool.acquire();
        assert_eq!(buf.capacity(), 128);
        buf.write(b"leftover");
        assert_eq!(pool.in_use(), 1);

        pool.release(buf);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.idle(), 1);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_bounded_free_list() {
        let pool = BufferPool::new(2, 16);
        let bufs: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        assert_eq!(pool.allocated(), 5);

        for buf in bufs {
            pool.release(buf);
        }
        assert_eq!(pool.idle(), 2);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_grown_buffer_not_retained() {
        let pool = BufferPool::new(4, 64);

        let mut big = pool.acquire();
        big.write(&vec![7u8; pool.retain_limit() + 1]);
        assert!(big.capacity() > pool.retain_limit());
        pool.release(big);
        assert_eq!(pool.idle(), 0);
        assert_eq!(pool.in_use(), 0);

        let mut grown = pool.acquire();
        grown.write(&[1u8; 200]);
        pool.release(grown);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.allocated(), 2);
    }
}
