//! Growable byte buffer with read/write cursors.
//!
//! Used as the I/O staging area of a connection and as the framing cursor
//! handed to decoders. Layout:
//!
//! ```text
//!  0        start          end         capacity
//!  |--consumed--|---unread---|---free---|
//! ```
//!
//! Every fallible operation leaves `start`/`end` exactly where they were,
//! so a decoder that fails with `DataNotEnough` can retry from the same
//! logical offset once more bytes arrive.

use crate::constants::{GROWTH_THRESHOLD, MIN_GROWTH};
use crate::error::BufferError;

/// Growable byte store. Invariant: `start <= end <= storage.len()`.
#[derive(Clone, Default)]
pub struct Buffer {
    storage: Vec<u8>,
    start: usize,
    end: usize,
}

impl Buffer {
    /// Create an empty buffer with `capacity` bytes of backing storage.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity],
            start: 0,
            end: 0,
        }
    }

    /// Number of unread bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    /// Unread bytes, without consuming them.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.storage[self.start..self.end]
    }

    /// Append `data`, growing storage first if it does not fit.
    ///
    /// Always appends every byte; returns `data.len()`.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let needed = self.end + data.len();
        if needed > self.capacity() {
            self.grow_to(needed);
        }
        self.storage[self.end..needed].copy_from_slice(data);
        self.end = needed;
        data.len()
    }

    /// Copy up to `dst.len()` unread bytes into `dst` and consume them.
    ///
    /// An empty buffer is compacted and reports `Eof`, unless `dst` is empty
    /// too, which is a no-op success.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize, BufferError> {
        if self.is_empty() {
            self.reset();
            if dst.is_empty() {
                return Ok(0);
            }
            return Err(BufferError::Eof);
        }
        let n = dst.len().min(self.len());
        dst[..n].copy_from_slice(&self.storage[self.start..self.start + n]);
        self.start += n;
        Ok(n)
    }

    /// View the next `n` unread bytes without moving any cursor.
    pub fn peek(&self, n: usize) -> Result<&[u8], BufferError> {
        if self.len() < n {
            return Err(BufferError::DataNotEnough);
        }
        Ok(&self.storage[self.start..self.start + n])
    }

    /// Skip `offset` bytes, then consume and return the next `n`.
    ///
    /// Nothing moves unless `offset + n` bytes are available.
    pub fn read_at(&mut self, offset: usize, n: usize) -> Result<&[u8], BufferError> {
        if self.is_empty() {
            self.reset();
            return Err(BufferError::Eof);
        }
        if self.len() < offset + n {
            return Err(BufferError::DataNotEnough);
        }
        let from = self.start + offset;
        self.start = from + n;
        Ok(&self.storage[from..from + n])
    }

    /// Consume and return every unread byte.
    pub fn read_all(&mut self) -> Result<&[u8], BufferError> {
        let len = self.len();
        self.read_at(0, len)
    }

    /// Move unread bytes to the front of storage. No-op if `start == 0`.
    pub fn reset(&mut self) {
        if self.start == 0 {
            return;
        }
        self.storage.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
    }

    /// Drop every unread byte, keeping the storage for reuse.
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Capacity after one growth step from `capacity`.
    ///
    /// Doubles below 4 KiB, then grows by a quarter.
    #[inline]
    pub fn next_capacity(capacity: usize) -> usize {
        if capacity == 0 {
            MIN_GROWTH
        } else if capacity < GROWTH_THRESHOLD {
            capacity * 2
        } else {
            capacity + capacity / 4
        }
    }

    fn grow_to(&mut self, needed: usize) {
        let mut capacity = self.capacity();
        while capacity < needed {
            capacity = Self::next_capacity(capacity);
        }
        let mut storage = vec![0; capacity];
        storage[..self.end].copy_from_slice(&self.storage[..self.end]);
        self.storage = storage;
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl std::io::Read for Buffer {
    fn read(&mut self, dst: &mut [u8]) -> std::io::Result<usize> {
        match Buffer::read(self, dst) {
            Ok(n) => Ok(n),
            Err(_) => Ok(0),
        }
    }
}

impl std::io::Write for Buffer {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        Ok(Buffer::write(self, data))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_scenario() {
        let mut b = Buffer::with_capacity(6);

        assert_eq!(b.write(b"123"), 3);
        assert_eq!((b.len(), b.capacity()), (3, 6));

        assert_eq!(b.write(b"456"), 3);
        assert_eq!((b.len(), b.capacity()), (6, 6));

        assert_eq!(b.write(b"789"), 3);
        assert_eq!((b.len(), b.capacity()), (9, 12));
        assert_eq!(b.bytes(), b"123456789");
    }

    #[test]
    fn test_growth_policy() {
        assert_eq!(Buffer::next_capacity(6), 12);
        assert_eq!(Buffer::next_capacity(4095), 8190);
        assert_eq!(Buffer::next_capacity(4096), 5120);
        assert_eq!(Buffer::next_capacity(8000), 10000);
        assert_eq!(Buffer::next_capacity(0), MIN_GROWTH);
    }

    #[test]
    fn test_large_write_grows_repeatedly() {
        let mut b = Buffer::with_capacity(2);
        b.write(b"ab");
        let big = vec![7u8; 10_000];
        assert_eq!(b.write(&big), 10_000);
        assert_eq!(b.len(), 10_002);
        assert_eq!(&b.bytes()[..2], b"ab");
        assert!(b.bytes()[2..].iter().all(|&x| x == 7));
    }

    #[test]
    fn test_zero_capacity_buffer() {
        let mut b = Buffer::default();
        assert_eq!(b.capacity(), 0);
        b.write(b"hello");
        assert_eq!(b.bytes(), b"hello");
    }

    #[test]
    fn test_byte_stream_identity() {
        let mut b = Buffer::with_capacity(4);
        let mut written = Vec::new();
        let mut read = Vec::new();
        let mut out = [0u8; 7];

        for round in 0..200usize {
            let chunk: Vec<u8> = (0..(round % 13)).map(|i| (round * 31 + i) as u8).collect();
            b.write(&chunk);
            written.extend_from_slice(&chunk);

            if round % 3 == 0 {
                while let Ok(n) = b.read(&mut out) {
                    read.extend_from_slice(&out[..n]);
                }
            }
        }
        while let Ok(n) = b.read(&mut out) {
            read.extend_from_slice(&out[..n]);
        }
        assert_eq!(read, written);
    }

    #[test]
    fn test_read_empty() {
        let mut b = Buffer::with_capacity(8);
        let mut out = [0u8; 4];
        assert_eq!(b.read(&mut out), Err(BufferError::Eof));
        assert_eq!(b.read(&mut []), Ok(0));

        b.write(b"xy");
        assert_eq!(b.read(&mut out), Ok(2));
        assert_eq!((b.start(), b.end()), (2, 2));

        // Drained: next read compacts before reporting end of data
        assert_eq!(b.read(&mut out), Err(BufferError::Eof));
        assert_eq!((b.start(), b.end()), (0, 0));
    }

    #[test]
    fn test_peek_does_not_move() {
        let mut b = Buffer::with_capacity(8);
        b.write(b"abcdef");
        assert_eq!(b.peek(4), Ok(&b"abcd"[..]));
        assert_eq!((b.start(), b.end()), (0, 6));

        assert_eq!(b.peek(7), Err(BufferError::DataNotEnough));
        assert_eq!((b.start(), b.end()), (0, 6));
    }

    #[test]
    fn test_read_at_rollback() {
        let mut b = Buffer::with_capacity(8);
        b.write(b"abcdef");

        assert_eq!(b.read_at(4, 3), Err(BufferError::DataNotEnough));
        assert_eq!((b.start(), b.end()), (0, 6));

        assert_eq!(b.read_at(1, 2), Ok(&b"bc"[..]));
        assert_eq!((b.start(), b.end()), (3, 6));

        assert_eq!(b.read_all(), Ok(&b"def"[..]));
        assert!(b.is_empty());
        assert_eq!(b.read_all(), Err(BufferError::Eof));
    }

    #[test]
    fn test_peek_then_failed_read_at() {
        let mut b = Buffer::with_capacity(16);
        b.write(&[0, 0, 0, 12, b'p']);
        let header = b.peek(4).map(|h| h.to_vec());
        assert_eq!(header, Ok(vec![0, 0, 0, 12]));
        assert!(b.read_at(4, 8).is_err());
        assert_eq!((b.start(), b.end()), (0, 5));
    }

    #[test]
    fn test_reset_compacts() {
        let mut b = Buffer::with_capacity(8);
        b.write(b"abcdef");
        let mut out = [0u8; 2];
        b.read(&mut out).unwrap();

        let len = b.len();
        b.reset();
        assert_eq!(b.len(), len);
        assert_eq!(b.start(), 0);
        assert_eq!(b.bytes(), b"cdef");

        // No-op when already at the front
        b.reset();
        assert_eq!((b.start(), b.end()), (0, 4));
    }

    #[test]
    fn test_growth_keeps_unread_after_partial_read() {
        let mut b = Buffer::with_capacity(4);
        b.write(b"abcd");
        let mut out = [0u8; 3];
        b.read(&mut out).unwrap();
        b.write(b"efgh");
        assert_eq!(b.bytes(), b"defgh");
    }

    #[test]
    fn test_clear() {
        let mut b = Buffer::with_capacity(4);
        b.write(b"abc");
        b.clear();
        assert!(b.is_empty());
        assert_eq!(b.capacity(), 4);
    }

    #[test]
    fn test_io_traits() {
        use std::io::{Read, Write};

        let mut b = Buffer::with_capacity(4);
        Write::write_all(&mut b, b"stream").unwrap();
        let mut s = String::new();
        Read::read_to_string(&mut b, &mut s).unwrap();
        assert_eq!(s, "stream");
    }
}
