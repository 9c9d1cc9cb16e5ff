//! Single-producer/single-consumer byte ring buffer.
//!
//! The building block for both sides of the deferred-work bridge: the shared
//! request channel (real-time thread -> work thread) and each worker's
//! private response channel (work thread -> real-time thread). Reads and
//! writes are all-or-nothing, so a frame written as several consecutive
//! calls becomes visible to the reader one complete piece at a time and a
//! size prefix can be trusted once it is readable.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fixed-capacity SPSC byte queue with wrap-around.
///
/// Capacity is rounded up to the next power of two and is fully usable.
/// Exactly one thread may write and exactly one thread may read at any
/// given time; the type is `Sync` under that discipline.
pub struct RingBuffer {
    storage: Box<[UnsafeCell<u8>]>,
    mask: usize,
    /// Free-running read position, owned by the consumer.
    head: AtomicUsize,
    /// Free-running write position, owned by the producer.
    tail: AtomicUsize,
}

// Safety: head/tail are atomics and the byte storage is only touched in
// regions the counters hand over between the two sides.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Create a ring able to hold at least `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let storage = (0..capacity).map(|_| UnsafeCell::new(0)).collect();
        Self {
            storage,
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes currently readable.
    pub fn read_space(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    /// Bytes currently writable.
    pub fn write_space(&self) -> usize {
        self.capacity() - self.read_space()
    }

    pub fn can_read(&self, bytes: usize) -> bool {
        bytes != 0 && bytes <= self.read_space()
    }

    pub fn can_write(&self, bytes: usize) -> bool {
        bytes != 0 && bytes <= self.write_space()
    }

    /// Append `src` to the ring. Returns the number of bytes written:
    /// `src.len()` on success, 0 if `src` is empty or free space is short.
    /// Never writes a partial buffer.
    pub fn write(&self, src: &[u8]) -> usize {
        if src.is_empty() {
            return 0;
        }
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        if self.capacity() - tail.wrapping_sub(head) < src.len() {
            return 0;
        }
        for (i, &byte) in src.iter().enumerate() {
            let slot = (tail.wrapping_add(i)) & self.mask;
            unsafe { *self.storage[slot].get() = byte };
        }
        self.tail.store(tail.wrapping_add(src.len()), Ordering::Release);
        src.len()
    }

    /// Read exactly `dest.len()` bytes, advancing the read position.
    /// Returns the number of bytes read: `dest.len()` on success, 0 if
    /// fewer bytes are available. Never reads a partial buffer.
    pub fn read(&self, dest: &mut [u8]) -> usize {
        let n = self.copy_out(dest);
        if n > 0 {
            let head = self.head.load(Ordering::Relaxed);
            self.head.store(head.wrapping_add(n), Ordering::Release);
        }
        n
    }

    /// Like [`read`](Self::read) but leaves the read position untouched.
    pub fn peek(&self, dest: &mut [u8]) -> usize {
        self.copy_out(dest)
    }

    /// Discard up to `bytes` readable bytes. Returns how many were skipped.
    pub fn skip(&self, bytes: usize) -> usize {
        let n = bytes.min(self.read_space());
        if n > 0 {
            let head = self.head.load(Ordering::Relaxed);
            self.head.store(head.wrapping_add(n), Ordering::Release);
        }
        n
    }

    /// Drop all pending bytes. Consumer side only.
    pub fn clear(&self) {
        let tail = self.tail.load(Ordering::Acquire);
        self.head.store(tail, Ordering::Release);
    }

    fn copy_out(&self, dest: &mut [u8]) -> usize {
        if dest.is_empty() {
            return 0;
        }
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Relaxed);
        if tail.wrapping_sub(head) < dest.len() {
            return 0;
        }
        for (i, byte) in dest.iter_mut().enumerate() {
            let slot = (head.wrapping_add(i)) & self.mask;
            *byte = unsafe { *self.storage[slot].get() };
        }
        dest.len()
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("read_space", &self.read_space())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_sizes() {
        let ring = RingBuffer::new(64);
        for k in 0..=ring.capacity() {
            let src: Vec<u8> = (0..k).map(|i| (i % 251) as u8).collect();
            let written = ring.write(&src);
            if k == 0 {
                assert_eq!(written, 0);
                continue;
            }
            assert_eq!(written, k);
            let mut dest = vec![0u8; k];
            assert_eq!(ring.read(&mut dest), k);
            assert_eq!(dest, src);
        }
    }

    #[test]
    fn test_write_refused_when_short_on_space() {
        let ring = RingBuffer::new(16);
        assert_eq!(ring.write(&[1u8; 12]), 12);
        // 4 bytes free, 5 requested
        assert_eq!(ring.write(&[2u8; 5]), 0);
        assert_eq!(ring.read_space(), 12);
        // refusal left the buffer untouched
        let mut dest = [0u8; 12];
        assert_eq!(ring.read(&mut dest), 12);
        assert_eq!(dest, [1u8; 12]);
    }

    #[test]
    fn test_full_cycle_restores_capacity() {
        let ring = RingBuffer::new(32);
        let src = vec![7u8; ring.capacity()];
        assert_eq!(ring.write(&src), src.len());
        assert!(!ring.can_write(1));
        let mut dest = vec![0u8; src.len()];
        assert_eq!(ring.read(&mut dest), src.len());
        assert!(ring.can_write(ring.capacity()));
    }

    #[test]
    fn test_wrap_around_preserves_fifo_order() {
        let ring = RingBuffer::new(16);
        let mut expected = 0u8;
        for cycle in 0..10 {
            let src: Vec<u8> = (0..10).map(|i| (cycle * 10 + i) as u8).collect();
            assert_eq!(ring.write(&src), 10, "cycle {cycle}");
            let mut dest = [0u8; 10];
            assert_eq!(ring.read(&mut dest), 10, "cycle {cycle}");
            for byte in dest {
                assert_eq!(byte, expected);
                expected = expected.wrapping_add(1);
            }
        }
    }

    #[test]
    fn test_peek_does_not_advance() {
        let ring = RingBuffer::new(16);
        ring.write(&[1, 2, 3, 4]);
        let mut dest = [0u8; 4];
        assert_eq!(ring.peek(&mut dest), 4);
        assert_eq!(dest, [1, 2, 3, 4]);
        assert_eq!(ring.read_space(), 4);
        assert_eq!(ring.read(&mut dest), 4);
        assert_eq!(dest, [1, 2, 3, 4]);
        assert_eq!(ring.read_space(), 0);
    }

    #[test]
    fn test_read_refused_when_short() {
        let ring = RingBuffer::new(16);
        ring.write(&[9, 9]);
        let mut dest = [0u8; 3];
        assert_eq!(ring.read(&mut dest), 0);
        assert_eq!(ring.read_space(), 2);
    }

    #[test]
    fn test_zero_byte_queries() {
        let ring = RingBuffer::new(8);
        assert!(!ring.can_read(0));
        assert!(!ring.can_write(0));
        assert_eq!(ring.write(&[]), 0);
    }

    #[test]
    fn test_skip_and_clear() {
        let ring = RingBuffer::new(16);
        ring.write(&[1, 2, 3, 4, 5]);
        assert_eq!(ring.skip(2), 2);
        let mut dest = [0u8; 3];
        assert_eq!(ring.read(&mut dest), 3);
        assert_eq!(dest, [3, 4, 5]);
        ring.write(&[6, 7]);
        ring.clear();
        assert_eq!(ring.read_space(), 0);
    }

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        assert_eq!(RingBuffer::new(100).capacity(), 128);
        assert_eq!(RingBuffer::new(128).capacity(), 128);
    }
}
