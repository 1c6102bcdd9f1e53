//! Size header stored in front of caller-visible bytes.
//!
//! Layout of a block in [`SizeTracking::Header`] mode:
//!
//! ```text
//! base                 base + HEADER_SIZE
//! |  requested size    |  caller bytes ...  |
//! ```

use std::ptr::NonNull;

/// Bytes taken by the size header.
pub const HEADER_SIZE: usize = std::mem::size_of::<usize>();

/// How the allocator learns the true size of a block when releasing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeTracking {
    /// Prefix every block with a [`HEADER_SIZE`] size header.
    #[default]
    Header,
    /// Trust the primitive's reported usable size; no header.
    Native,
}

impl SizeTracking {
    /// Bytes reserved in front of the caller region.
    pub const fn overhead(self) -> usize {
        match self {
            SizeTracking::Header => HEADER_SIZE,
            SizeTracking::Native => 0,
        }
    }

    /// Bytes to request from a primitive for `size` caller bytes.
    pub fn total_size(self, size: usize) -> Option<usize> {
        size.checked_add(self.overhead()).map(|total| total.max(1))
    }
}

/// Record `size` at the start of the block.
///
/// # Safety
///
/// `base` must be valid for writes of [`HEADER_SIZE`] bytes.
pub unsafe fn encode(base: NonNull<u8>, size: usize) {
    base.as_ptr().cast::<usize>().write_unaligned(size);
}

/// Read back the size stored by [`encode`].
///
/// # Safety
///
/// `base` must point at a header previously written by [`encode`].
pub unsafe fn decode(base: NonNull<u8>) -> usize {
    base.as_ptr().cast::<usize>().read_unaligned()
}
