//! Standard (non-NUMA) allocation primitive.

use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr::NonNull;

/// Alignment of every block handed out by a primitive.
pub const MIN_ALIGN: usize = 16;

/// A size-addressed allocation primitive.
///
/// Sizes passed to `deallocate` and `reallocate` are the sizes the block was
/// requested with, so implementations never need to store them.
pub trait RawAllocator: Send + Sync + std::fmt::Debug {
    /// Allocate `size` bytes aligned to [`MIN_ALIGN`].
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// `ptr` must come from this allocator with the given `size`.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize);

    /// Resize a block, keeping `min(old_size, new_size)` bytes. The default
    /// allocates, copies and frees.
    ///
    /// # Safety
    ///
    /// Same as [`RawAllocator::deallocate`]. On `None` the original block is
    /// still valid.
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let new_ptr = self.allocate(new_size)?;
        std::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(new_size));
        self.deallocate(ptr, old_size);
        Some(new_ptr)
    }

    /// Bytes really reserved for the block at `ptr`, requested with `size`.
    /// The default reports the requested size.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator requested with `size`.
    unsafe fn usable_size(&self, _ptr: NonNull<u8>, size: usize) -> usize {
        size
    }
}

fn layout_for(size: usize) -> Option<Layout> {
    Layout::from_size_align(size.max(1), MIN_ALIGN).ok()
}

/// The platform allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl RawAllocator for SystemAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = layout_for(size)?;
        NonNull::new(unsafe { System.alloc(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        if let Some(layout) = layout_for(size) {
            System.dealloc(ptr.as_ptr(), layout);
        }
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let old_layout = layout_for(old_size)?;
        // realloc requires the new size to form a valid layout too
        layout_for(new_size)?;
        NonNull::new(System.realloc(ptr.as_ptr(), old_layout, new_size.max(1)))
    }

    /// glibc hands out size-class rounded chunks; report the whole chunk.
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    unsafe fn usable_size(&self, ptr: NonNull<u8>, size: usize) -> usize {
        libc::malloc_usable_size(ptr.as_ptr().cast()).max(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct CopyingAllocator;

    impl RawAllocator for CopyingAllocator {
        fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
            SystemAllocator.allocate(size)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
            SystemAllocator.deallocate(ptr, size)
        }
    }

    #[test]
    fn test_system_allocator() {
        let allocator = SystemAllocator;
        let ptr = allocator.allocate(1024).unwrap();
        assert_eq!(ptr.as_ptr() as usize % MIN_ALIGN, 0);
        unsafe { allocator.deallocate(ptr, 1024) };
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let allocator = SystemAllocator;
        let ptr = allocator.allocate(0).unwrap();
        unsafe { allocator.deallocate(ptr, 0) };
    }

    #[test]
    fn test_oversized_request_fails() {
        assert!(SystemAllocator.allocate(usize::MAX).is_none());
    }

    #[test]
    fn test_reallocate_preserves_prefix() {
        let allocator = SystemAllocator;
        let ptr = allocator.allocate(4).unwrap();
        unsafe {
            std::ptr::copy_nonoverlapping(b"ABCD".as_ptr(), ptr.as_ptr(), 4);
            let ptr = allocator.reallocate(ptr, 4, 4096).unwrap();
            assert_eq!(std::slice::from_raw_parts(ptr.as_ptr(), 4), b"ABCD");
            allocator.deallocate(ptr, 4096);
        }
    }

    #[test]
    fn test_usable_size_covers_request() {
        let allocator = SystemAllocator;
        for size in [1, 13, 100, 4096] {
            let ptr = allocator.allocate(size).unwrap();
            let usable = unsafe { allocator.usable_size(ptr, size) };
            assert!(usable >= size);
            unsafe { allocator.deallocate(ptr, size) };
        }

        let ptr = CopyingAllocator.allocate(13).unwrap();
        assert_eq!(unsafe { CopyingAllocator.usable_size(ptr, 13) }, 13);
        unsafe { CopyingAllocator.deallocate(ptr, 13) };
    }

    #[test]
    fn test_default_reallocate_copies() {
        let allocator = CopyingAllocator;
        let ptr = allocator.allocate(8).unwrap();
        unsafe {
            std::ptr::copy_nonoverlapping(b"12345678".as_ptr(), ptr.as_ptr(), 8);
            let ptr = allocator.reallocate(ptr, 8, 3).unwrap();
            assert_eq!(std::slice::from_raw_parts(ptr.as_ptr(), 3), b"123");
            allocator.deallocate(ptr, 3);
        }
    }
}
