//! Owned handle to memory obtained from a [`NumaAllocator`].
//!
//! [`NumaAllocator`]: crate::NumaAllocator

use crate::topology::NodeId;
use std::ffi::CStr;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

/// Which primitive produced a block. Release and resize always go back
/// through the same primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// NUMA backend, bound to the given node at allocation time.
    Node(NodeId),
    /// Standard allocator.
    Standard,
}

/// A live allocation.
///
/// Derefs to the caller-visible bytes, which are always initialized. The
/// block must be handed back to the allocator that created it with
/// `release`, `reallocate` or `reallocate_on_node`; dropping it leaks the
/// memory and leaves it charged to the usage ledger.
#[must_use = "dropping a Block leaks it; hand it back with `release`"]
pub struct Block {
    base: NonNull<u8>,
    offset: usize,
    len: usize,
    capacity: usize,
    origin: Origin,
    owner: u64,
}

// Block owns its memory exclusively, like Vec<u8>.
unsafe impl Send for Block {}
unsafe impl Sync for Block {}

impl Block {
    pub(crate) fn new(
        base: NonNull<u8>,
        offset: usize,
        len: usize,
        capacity: usize,
        origin: Origin,
        owner: u64,
    ) -> Self {
        Self {
            base,
            offset,
            len,
            capacity,
            origin,
            owner,
        }
    }

    /// Caller-visible bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes charged to the usage ledger for this block, header included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Node the block was placed on, `None` for standard allocations.
    pub fn node(&self) -> Option<NodeId> {
        match self.origin {
            Origin::Node(node) => Some(node),
            Origin::Standard => None,
        }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.data().as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data().as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data().as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.data().as_ptr(), self.len) }
    }

    /// Contents up to the first NUL, if there is one.
    pub fn as_c_str(&self) -> Option<&CStr> {
        CStr::from_bytes_until_nul(self.as_slice()).ok()
    }

    fn data(&self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.offset)) }
    }

    /// True allocation base, before any header.
    pub(crate) fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub(crate) fn header_offset(&self) -> usize {
        self.offset
    }

    /// Size the primitive was asked for.
    pub(crate) fn footprint(&self) -> usize {
        (self.offset + self.len).max(1)
    }

    pub(crate) fn owner(&self) -> u64 {
        self.owner
    }
}

impl Deref for Block {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl DerefMut for Block {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl AsRef<[u8]> for Block {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("ptr", &self.as_ptr())
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("origin", &self.origin)
            .finish()
    }
}
