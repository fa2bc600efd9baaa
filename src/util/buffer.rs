//! Aligned IO buffers
//!
//! O_DIRECT requires the buffer address, the transfer length and the file
//! offset to be multiples of the device's logical sector size. Each worker
//! allocates one of these per queue slot at startup and reuses it for the
//! whole test, so the hot path never allocates.

use crate::Result;
use anyhow::{anyhow, ensure};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::alloc::{alloc_zeroed, dealloc, Layout};

/// Alignment used for direct IO buffers and offsets
pub const SECTOR_ALIGNMENT: usize = 4096;

/// Heap buffer whose start address is aligned to `alignment`
pub struct AlignedBuffer {
    ptr: *mut u8,
    size: usize,
    alignment: usize,
    layout: Layout,
}

impl AlignedBuffer {
    /// Allocate a zeroed buffer of `size` bytes aligned to `alignment`
    ///
    /// `alignment` must be a power of two and `size` must be non-zero.
    pub fn new(size: usize, alignment: usize) -> Result<Self> {
        ensure!(alignment.is_power_of_two(), "alignment {} is not a power of 2", alignment);
        ensure!(size > 0, "buffer size must be greater than 0");

        let layout = Layout::from_size_align(size, alignment)
            .map_err(|e| anyhow!("invalid buffer layout ({} bytes, align {}): {}", size, alignment, e))?;

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        ensure!(!ptr.is_null(), "failed to allocate {} byte aligned buffer", size);

        Ok(Self {
            ptr,
            size,
            alignment,
            layout,
        })
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    #[inline(always)]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for size bytes for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr, self.size) }
    }

    #[inline(always)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for size bytes and uniquely borrowed.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.size) }
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    #[inline(always)]
    pub fn is_aligned(&self) -> bool {
        (self.ptr as usize) % self.alignment == 0
    }

    /// Fill with pseudo-random bytes so written data does not compress or dedupe
    pub fn fill_random(&mut self, seed: u64) {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        rng.fill_bytes(self.as_mut_slice());
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with exactly this layout.
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

// SAFETY: the buffer exclusively owns its allocation.
unsafe impl Send for AlignedBuffer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_buffer_alignment() {
        for &alignment in &[512usize, 4096] {
            let buf = AlignedBuffer::new(128 * 1024, alignment).unwrap();
            assert!(buf.is_aligned());
            assert_eq!(buf.size(), 128 * 1024);
            assert_eq!(buf.alignment(), alignment);
        }
    }

    #[test]
    fn test_aligned_buffer_starts_zeroed() {
        let buf = AlignedBuffer::new(4096, SECTOR_ALIGNMENT).unwrap();
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_aligned_buffer_rejects_bad_params() {
        assert!(AlignedBuffer::new(4096, 3000).is_err());
        assert!(AlignedBuffer::new(0, 4096).is_err());
    }

    #[test]
    fn test_fill_random_is_seeded() {
        let mut a = AlignedBuffer::new(4096, SECTOR_ALIGNMENT).unwrap();
        let mut b = AlignedBuffer::new(4096, SECTOR_ALIGNMENT).unwrap();
        a.fill_random(7);
        b.fill_random(7);
        assert_eq!(a.as_slice(), b.as_slice());
        assert!(a.as_slice().iter().any(|&x| x != 0));

        b.fill_random(8);
        assert_ne!(a.as_slice(), b.as_slice());
    }
}
