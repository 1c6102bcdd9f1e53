//! Process-wide allocator for callers that want free functions.
//!
//! A thin layer over one [`NumaAllocator`] held in a static slot. Code that
//! can pass a context around should prefer [`NumaAllocator`] directly.

use crate::allocator::NumaAllocator;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::memory::Block;
use crate::policy::PlacementPolicy;
use crate::topology::NodeId;
use parking_lot::RwLock;
use std::sync::Arc;

static GLOBAL_ALLOCATOR: RwLock<Option<Arc<NumaAllocator>>> = RwLock::new(None);

pub fn init() -> Result<()> {
    init_with_config(Config::default())
}

pub fn init_with_config(config: Config) -> Result<()> {
    let mut slot = GLOBAL_ALLOCATOR.write();
    if slot.is_some() {
        return Err(Error::AlreadyInitialized);
    }
    *slot = Some(Arc::new(NumaAllocator::new(config)?));
    Ok(())
}

/// Install an already built context as the process-wide allocator.
pub fn install(allocator: NumaAllocator) -> Result<()> {
    let mut slot = GLOBAL_ALLOCATOR.write();
    if slot.is_some() {
        return Err(Error::AlreadyInitialized);
    }
    *slot = Some(Arc::new(allocator));
    Ok(())
}

/// Drop the process-wide allocator. Blocks still out are leaked.
pub fn shutdown() {
    GLOBAL_ALLOCATOR.write().take();
}

pub fn is_initialized() -> bool {
    GLOBAL_ALLOCATOR.read().is_some()
}

/// Handle to the process-wide allocator.
pub fn current() -> Result<Arc<NumaAllocator>> {
    GLOBAL_ALLOCATOR
        .read()
        .as_ref()
        .cloned()
        .ok_or(Error::NotInitialized)
}

fn with_global<F, R>(f: F) -> Result<R>
where
    F: FnOnce(&NumaAllocator) -> Result<R>,
{
    let allocator = current()?;
    f(&allocator)
}

pub fn allocate(size: usize) -> Result<Block> {
    with_global(|a| a.allocate(size))
}

pub fn allocate_on_node(size: usize, node: NodeId) -> Result<Block> {
    with_global(|a| a.allocate_on_node(size, node))
}

pub fn reallocate(block: Option<Block>, size: usize) -> Result<Block> {
    with_global(|a| a.reallocate(block, size))
}

pub fn reallocate_on_node(block: Option<Block>, size: usize, node: NodeId) -> Result<Block> {
    with_global(|a| a.reallocate_on_node(block, size, node))
}

pub fn release(block: impl Into<Option<Block>>) -> Result<()> {
    with_global(|a| {
        a.release(block);
        Ok(())
    })
}

pub fn duplicate_string(s: &str) -> Result<Block> {
    with_global(|a| a.duplicate_string(s))
}

pub fn used_memory() -> Result<usize> {
    with_global(|a| Ok(a.used_memory()))
}

pub fn enable_thread_safety() -> Result<()> {
    with_global(|a| {
        a.enable_thread_safety();
        Ok(())
    })
}

pub fn set_default_node(node: NodeId) -> Result<()> {
    with_global(|a| a.set_default_node(node))
}

pub fn current_node() -> Result<Option<NodeId>> {
    with_global(|a| Ok(a.current_node()))
}

pub fn set_placement_policy(policy: PlacementPolicy) -> Result<()> {
    with_global(|a| {
        a.set_placement_policy(policy);
        Ok(())
    })
}

pub fn cleanup_topology() -> Result<()> {
    with_global(|a| {
        a.cleanup_topology();
        Ok(())
    })
}
