//! Allocation primitives, the block header codec and the owned block handle.

pub mod allocator;
pub mod block;
pub mod header;

pub use allocator::{RawAllocator, SystemAllocator, MIN_ALIGN};
pub use block::{Block, Origin};
pub use header::{SizeTracking, HEADER_SIZE};
