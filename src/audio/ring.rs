//! Lock-free ring buffer for decoded PCM bytes
//!
//! This implements a single-producer single-consumer (SPSC) byte ring
//! sitting between the decode cycle on the reactor thread and the
//! real-time device callback. Both sides only ever observe short counts;
//! neither blocks.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

/// Lock-free SPSC ring buffer over bytes.
///
/// Capacity must be a power of two. The read and write indices increase
/// monotonically and wrap naturally; the distance between them is the
/// number of readable bytes, so the full capacity is usable. Bytes are
/// published with release stores on the write index and acquired by the
/// reader before copying, and symmetrically for consumption.
///
/// At most one thread may write and one may read concurrently; any other
/// pairing needs external synchronisation.
pub struct RingBuffer {
    buf: Box<[u8]>,
    mask: usize,
    read_idx: AtomicUsize,
    write_idx: AtomicUsize,
}

// SAFETY: SPSC discipline. The writer only touches the region between
// write_idx and read_idx + capacity, the reader only the region between
// read_idx and write_idx, and the regions never overlap because each side
// first loads the other's index with Acquire and never copies more than
// the capacity it observed.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Create a ring buffer with the given capacity in bytes.
    ///
    /// The capacity must be a non-zero power of two.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(Error::Internal(format!(
                "ring buffer capacity must be a power of two, got {capacity}"
            )));
        }
        Ok(Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            mask: capacity - 1,
            read_idx: AtomicUsize::new(0),
            write_idx: AtomicUsize::new(0),
        })
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes that can be written right now.
    pub fn write_capacity(&self) -> usize {
        let w = self.write_idx.load(Ordering::Relaxed);
        let r = self.read_idx.load(Ordering::Acquire);
        self.capacity() - w.wrapping_sub(r)
    }

    /// Bytes that can be read right now.
    pub fn read_capacity(&self) -> usize {
        let w = self.write_idx.load(Ordering::Acquire);
        let r = self.read_idx.load(Ordering::Relaxed);
        w.wrapping_sub(r)
    }

    /// Copy up to `src.len()` bytes in. Returns the count actually
    /// written; never blocks, never fails.
    pub fn write(&self, src: &[u8]) -> usize {
        let w = self.write_idx.load(Ordering::Relaxed);
        let r = self.read_idx.load(Ordering::Acquire);
        let free = self.capacity() - w.wrapping_sub(r);
        let count = src.len().min(free);
        if count == 0 {
            return 0;
        }

        let start = w & self.mask;
        let first = (self.capacity() - start).min(count);
        let second = count - first;

        let buf_ptr = self.buf.as_ptr() as *mut u8;
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), buf_ptr.add(start), first);
            if second > 0 {
                std::ptr::copy_nonoverlapping(src[first..].as_ptr(), buf_ptr, second);
            }
        }

        self.write_idx.store(w.wrapping_add(count), Ordering::Release);
        count
    }

    /// Consume up to `dst.len()` bytes. Returns the count actually read;
    /// never blocks, never fails.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        let w = self.write_idx.load(Ordering::Acquire);
        let r = self.read_idx.load(Ordering::Relaxed);
        let avail = w.wrapping_sub(r);
        let count = dst.len().min(avail);
        if count == 0 {
            return 0;
        }

        let start = r & self.mask;
        let first = (self.capacity() - start).min(count);
        let second = count - first;

        unsafe {
            let buf_ptr = self.buf.as_ptr();
            std::ptr::copy_nonoverlapping(buf_ptr.add(start), dst.as_mut_ptr(), first);
            if second > 0 {
                std::ptr::copy_nonoverlapping(buf_ptr, dst[first..].as_mut_ptr(), second);
            }
        }

        self.read_idx.store(r.wrapping_add(count), Ordering::Release);
        count
    }

    /// Reset both indices, discarding all buffered bytes.
    ///
    /// Must only be called while no other thread is reading or writing.
    pub fn flush(&self) {
        self.read_idx.store(0, Ordering::Release);
        self.write_idx.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rejects_bad_capacity() {
        assert!(RingBuffer::new(0).is_err());
        assert!(RingBuffer::new(100).is_err());
        assert!(RingBuffer::new(128).is_ok());
    }

    #[test]
    fn basic_write_read() {
        let rb = RingBuffer::new(64).unwrap();
        let data: Vec<u8> = (0..40).collect();

        assert_eq!(rb.write(&data), 40);
        assert_eq!(rb.read_capacity(), 40);
        assert_eq!(rb.write_capacity(), 24);

        let mut out = vec![0u8; 40];
        assert_eq!(rb.read(&mut out), 40);
        assert_eq!(out, data);
        assert_eq!(rb.read_capacity(), 0);
    }

    #[test]
    fn short_counts_at_bounds() {
        let rb = RingBuffer::new(16).unwrap();

        // Full buffer: further writes return 0.
        assert_eq!(rb.write(&[1u8; 16]), 16);
        assert_eq!(rb.write(&[2u8; 4]), 0);

        // Empty buffer: reads return 0.
        let mut out = [0u8; 16];
        assert_eq!(rb.read(&mut out), 16);
        assert_eq!(rb.read(&mut out), 0);
    }

    #[test]
    fn wrap_around_preserves_order() {
        let rb = RingBuffer::new(16).unwrap();
        let mut out = [0u8; 16];

        assert_eq!(rb.write(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]), 12);
        assert_eq!(rb.read(&mut out[..8]), 8);

        // This write wraps past the end of the backing buffer.
        let second: Vec<u8> = (100..112).collect();
        assert_eq!(rb.write(&second), 12);

        let n = rb.read(&mut out);
        assert_eq!(n, 16);
        assert_eq!(out[0], 9);
        assert_eq!(out[3], 12);
        assert_eq!(&out[4..], &second[..]);
    }

    #[test]
    fn capacities_never_exceed_capacity() {
        let rb = RingBuffer::new(32).unwrap();
        rb.write(&[0u8; 20]);
        let mut out = [0u8; 7];
        rb.read(&mut out);
        assert!(rb.read_capacity() + rb.write_capacity() <= rb.capacity());
        assert_eq!(rb.read_capacity(), 13);
    }

    #[test]
    fn flush_discards_everything() {
        let rb = RingBuffer::new(32).unwrap();
        rb.write(&[9u8; 10]);
        rb.flush();
        assert_eq!(rb.read_capacity(), 0);
        assert_eq!(rb.write_capacity(), 32);
    }

    #[test]
    fn concurrent_spsc_transfers_all_bytes_in_order() {
        const TOTAL: usize = 1 << 18;
        let rb = Arc::new(RingBuffer::new(256).unwrap());

        let writer = {
            let rb = rb.clone();
            thread::spawn(move || {
                let mut sent = 0usize;
                while sent < TOTAL {
                    let chunk: Vec<u8> =
                        (sent..(sent + 64).min(TOTAL)).map(|i| (i % 251) as u8).collect();
                    let mut off = 0;
                    while off < chunk.len() {
                        off += rb.write(&chunk[off..]);
                        std::hint::spin_loop();
                    }
                    sent += chunk.len();
                }
            })
        };

        let mut received = 0usize;
        let mut buf = [0u8; 64];
        while received < TOTAL {
            let n = rb.read(&mut buf);
            for &b in &buf[..n] {
                assert_eq!(b, (received % 251) as u8);
                received += 1;
            }
            std::hint::spin_loop();
        }

        writer.join().unwrap();
        assert_eq!(received, TOTAL);
        assert_eq!(rb.read_capacity(), 0);
    }
}
