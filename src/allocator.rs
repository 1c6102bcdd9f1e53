//! The allocation core: an explicit allocator context.

use crate::config::{Config, OomStrategy};
use crate::error::{Error, Result};
use crate::ledger::UsageLedger;
use crate::memory::{header, Block, Origin, RawAllocator, SizeTracking, SystemAllocator};
use crate::policy::{self, Placement, PlacementPolicy};
use crate::telemetry::{AllocStats, AllocStatsSnapshot};
use crate::topology::{NodeId, NumaBackend, SystemNuma, TopologyDirectory};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// NUMA-aware allocator context.
///
/// Owns the topology cache, the placement policy selection, the usage ledger
/// and allocation statistics. Every [`Block`] it hands out must come back to
/// the same context.
///
/// Resizing a NUMA block goes through the backend's resize primitive, which
/// does not promise to keep the block on its original node.
pub struct NumaAllocator {
    id: u64,
    config: Config,
    topology: TopologyDirectory,
    standard: Arc<dyn RawAllocator>,
    policy: AtomicU8,
    ledger: UsageLedger,
    stats: AllocStats,
}

impl NumaAllocator {
    /// Context over the kernel NUMA backend and the system allocator.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_backend(config, Arc::new(SystemNuma::detect()))
    }

    pub fn with_backend(config: Config, backend: Arc<dyn NumaBackend>) -> Result<Self> {
        Self::with_parts(config, backend, Arc::new(SystemAllocator))
    }

    /// Context over explicit NUMA and standard primitives.
    pub fn with_parts(
        config: Config,
        backend: Arc<dyn NumaBackend>,
        standard: Arc<dyn RawAllocator>,
    ) -> Result<Self> {
        config.validate()?;

        let topology = if config.enable_numa {
            TopologyDirectory::new(backend).with_preferred_node(config.default_node)
        } else {
            TopologyDirectory::disabled(backend)
        };

        let ledger = UsageLedger::new();
        if config.thread_safe {
            ledger.enable_thread_safety();
        }

        Ok(Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            policy: AtomicU8::new(config.placement_policy as u8),
            config,
            topology,
            standard,
            ledger,
            stats: AllocStats::new(),
        })
    }

    /// End the context's lifecycle. Same as dropping it.
    pub fn destroy(self) {}

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn topology(&self) -> &TopologyDirectory {
        &self.topology
    }

    /// Allocate `size` bytes, choosing the node by the current policy.
    pub fn allocate(&self, size: usize) -> Result<Block> {
        self.allocate_with_hint(size, None)
    }

    /// Allocate `size` bytes on `node`, falling back to the standard
    /// allocator when the node cannot serve the request.
    pub fn allocate_on_node(&self, size: usize, node: NodeId) -> Result<Block> {
        self.allocate_with_hint(size, Some(node))
    }

    fn allocate_with_hint(&self, size: usize, hint: Option<NodeId>) -> Result<Block> {
        let tracking = self.config.size_tracking;
        let Some(total) = tracking.total_size(size) else {
            return self.out_of_memory(size, usize::MAX);
        };

        let Some((base, origin)) = self.place(total, hint) else {
            return self.out_of_memory(size, total);
        };

        let offset = tracking.overhead();
        unsafe {
            if offset > 0 {
                header::encode(base, size);
            }
            ptr::write_bytes(base.as_ptr().add(offset), 0, size);
        }

        let capacity = self.charged_size(origin, base, total);
        self.ledger.increment(capacity);
        self.stats.record_allocation(size, origin);

        Ok(Block::new(base, offset, size, capacity, origin, self.id))
    }

    /// Walk the placement candidates, then the standard primitive.
    fn place(&self, total: usize, hint: Option<NodeId>) -> Option<(NonNull<u8>, Origin)> {
        let snapshot = self.topology.snapshot();

        if let Placement::Nodes(candidates) = policy::plan(self.placement_policy(), hint, &snapshot) {
            let backend = self.topology.backend();
            for node in candidates {
                match backend.alloc_on_node(total, node) {
                    Some(ptr) => return Some((ptr, Origin::Node(node))),
                    None => {
                        tracing::debug!(%node, bytes = total, "placement candidate has no memory");
                        self.stats.record_candidate_failure();
                    }
                }
            }
            self.stats.record_fallback();
        }

        self.standard
            .allocate(total)
            .map(|ptr| (ptr, Origin::Standard))
    }

    /// Bytes the ledger carries for the block at `base`, requested with
    /// `total` bytes.
    fn charged_size(&self, origin: Origin, base: NonNull<u8>, total: usize) -> usize {
        match self.config.size_tracking {
            SizeTracking::Header => total,
            // base is live and came from the primitive matching origin
            SizeTracking::Native => unsafe {
                match origin {
                    Origin::Node(_) => self.topology.backend().usable_size(base, total),
                    Origin::Standard => self.standard.usable_size(base, total),
                }
            },
        }
    }

    /// Caller-visible size of a block, read from its header when headers
    /// are in use.
    fn stored_len(&self, block: &Block) -> usize {
        if block.header_offset() == 0 {
            return block.len();
        }
        let stored = unsafe { header::decode(block.base()) };
        debug_assert_eq!(stored, block.len(), "block header does not match handle");
        stored
    }

    fn out_of_memory<T>(&self, requested: usize, total: usize) -> Result<T> {
        self.stats.record_out_of_memory();
        tracing::error!(requested, total, "out of memory");
        match self.config.oom_strategy {
            OomStrategy::Abort => {
                eprintln!(
                    "numalloc: out of memory trying to allocate {requested} bytes ({total} total)"
                );
                std::process::abort();
            }
            OomStrategy::ReturnError => Err(Error::OutOfMemory { requested, total }),
        }
    }

    fn realloc_failed(&self, block: Block, requested: usize, total: usize) -> Result<Block> {
        match self.out_of_memory::<Block>(requested, total) {
            Err(Error::OutOfMemory { requested, total }) => Err(Error::ReallocFailed {
                requested,
                total,
                block: Box::new(block),
            }),
            other => other,
        }
    }

    fn check_owner(&self, block: Block) -> Result<Block> {
        if block.owner() == self.id {
            Ok(block)
        } else {
            tracing::error!(?block, "block belongs to another allocator context");
            Err(Error::ForeignBlock(Box::new(block)))
        }
    }

    /// Resize a block. `None` allocates a fresh one.
    ///
    /// The resize goes through the primitive that produced the block. For
    /// NUMA blocks the new memory may end up on a different node than the
    /// one recorded in [`Block::origin`].
    pub fn reallocate(&self, block: Option<Block>, size: usize) -> Result<Block> {
        let Some(block) = block else {
            return self.allocate(size);
        };
        let block = self.check_owner(block)?;

        let tracking = self.config.size_tracking;
        let Some(total) = tracking.total_size(size) else {
            return self.realloc_failed(block, size, usize::MAX);
        };

        let old_len = self.stored_len(&block);
        let origin = block.origin();
        let resized = unsafe {
            match origin {
                Origin::Node(_) => {
                    self.topology
                        .backend()
                        .realloc(block.base(), block.footprint(), total)
                }
                Origin::Standard => self.standard.reallocate(block.base(), block.footprint(), total),
            }
        };
        let Some(base) = resized else {
            return self.realloc_failed(block, size, total);
        };

        let offset = block.header_offset();
        unsafe {
            if offset > 0 {
                header::encode(base, size);
            }
            if size > old_len {
                ptr::write_bytes(base.as_ptr().add(offset + old_len), 0, size - old_len);
            }
        }

        let capacity = self.charged_size(origin, base, total);
        self.ledger.decrement(block.capacity());
        self.ledger.increment(capacity);
        self.stats.record_reallocation();

        Ok(Block::new(base, offset, size, capacity, origin, self.id))
    }

    /// Move a block to `node`: allocate there, copy, release the original.
    ///
    /// At most `size` bytes are copied. `None` is a plain allocation on
    /// `node`. If the new allocation fails under
    /// [`OomStrategy::ReturnError`], the original block comes back inside
    /// [`Error::ReallocFailed`].
    pub fn reallocate_on_node(
        &self,
        block: Option<Block>,
        size: usize,
        node: NodeId,
    ) -> Result<Block> {
        let Some(block) = block else {
            return self.allocate_on_node(size, node);
        };
        let block = self.check_owner(block)?;

        let mut fresh = match self.allocate_on_node(size, node) {
            Ok(fresh) => fresh,
            Err(Error::OutOfMemory { requested, total }) => {
                return Err(Error::ReallocFailed {
                    requested,
                    total,
                    block: Box::new(block),
                })
            }
            Err(err) => return Err(err),
        };

        let copy = self.stored_len(&block).min(size);
        fresh[..copy].copy_from_slice(&block[..copy]);
        self.release_owned(block);

        Ok(fresh)
    }

    /// Give a block back. `None` is a no-op.
    ///
    /// Blocks from another context are logged and left untouched.
    pub fn release(&self, block: impl Into<Option<Block>>) {
        let Some(block) = block.into() else {
            return;
        };
        if let Ok(block) = self.check_owner(block) {
            self.release_owned(block);
        }
    }

    fn release_owned(&self, block: Block) {
        let charged = match self.config.size_tracking {
            SizeTracking::Header => self.stored_len(&block) + block.header_offset(),
            SizeTracking::Native => block.capacity(),
        };
        self.ledger.decrement(charged);
        self.stats.record_release();

        unsafe {
            match block.origin() {
                Origin::Node(_) => self.topology.backend().free(block.base(), block.footprint()),
                Origin::Standard => self.standard.deallocate(block.base(), block.footprint()),
            }
        }
    }

    /// Copy `s` plus a NUL terminator into a new block.
    pub fn duplicate_string(&self, s: &str) -> Result<Block> {
        let bytes = s.as_bytes();
        let mut block = self.allocate(bytes.len() + 1)?;
        block[..bytes.len()].copy_from_slice(bytes);
        block[bytes.len()] = 0;
        Ok(block)
    }

    /// Bytes currently charged to this context.
    pub fn used_memory(&self) -> usize {
        self.ledger.used()
    }

    /// Lock the usage ledger for all later updates. One-way.
    pub fn enable_thread_safety(&self) {
        self.ledger.enable_thread_safety();
    }

    pub fn is_thread_safe(&self) -> bool {
        self.ledger.is_thread_safe()
    }

    /// Change the default node. Invalid nodes leave the current one in
    /// place.
    pub fn set_default_node(&self, node: NodeId) -> Result<()> {
        self.topology.set_default_node(node)
    }

    /// The cached default node, `None` when NUMA is unavailable.
    pub fn current_node(&self) -> Option<NodeId> {
        self.topology.current_node()
    }

    /// Takes effect from the next allocation on.
    pub fn set_placement_policy(&self, policy: PlacementPolicy) {
        self.policy.store(policy as u8, Ordering::Relaxed);
        tracing::debug!(%policy, "placement policy changed");
    }

    pub fn placement_policy(&self) -> PlacementPolicy {
        PlacementPolicy::from_u8(self.policy.load(Ordering::Relaxed))
    }

    /// Nodes nearest first, as captured when the topology was initialized.
    pub fn nodes_by_distance(&self) -> Vec<NodeId> {
        self.topology.nodes_by_distance()
    }

    /// Drop the cached topology; the next use rediscovers it.
    pub fn cleanup_topology(&self) {
        self.topology.cleanup();
    }

    pub fn stats(&self) -> AllocStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for NumaAllocator {
    fn drop(&mut self) {
        let used = self.ledger.used();
        if used > 0 {
            tracing::debug!(used, "allocator context dropped with live blocks");
        }
        self.topology.cleanup();
    }
}

impl fmt::Debug for NumaAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumaAllocator")
            .field("id", &self.id)
            .field("policy", &self.placement_policy())
            .field("ledger", &self.ledger)
            .field("topology", &self.topology)
            .finish()
    }
}
