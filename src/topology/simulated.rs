//! Software NUMA topology for tests and benchmarks.

use super::{NodeId, NumaBackend};
use crate::error::{Error, Result};
use crate::memory::{RawAllocator, SystemAllocator};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Distance reported for a node to itself.
pub const LOCAL_DISTANCE: u32 = 10;
/// Default distance between two different nodes.
pub const REMOTE_DISTANCE: u32 = 20;

/// Simulated NUMA machine.
///
/// Node memory is carved from the system allocator; only bookkeeping is per
/// node. Failures can be injected per node at any time, which makes every
/// allocation attempt on that node return nothing.
#[derive(Debug)]
pub struct SimulatedNuma {
    node_count: u32,
    distances: Vec<Vec<u32>>,
    available: bool,
    current: AtomicU32,
    failing: Mutex<HashSet<NodeId>>,
    owners: Mutex<HashMap<usize, NodeId>>,
    live: Vec<AtomicUsize>,
    attempts: Vec<AtomicUsize>,
    memory: SystemAllocator,
}

impl SimulatedNuma {
    /// Machine with `node_count` nodes, local distance 10 and remote 20.
    pub fn new(node_count: u32) -> Self {
        let n = node_count as usize;
        let distances = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| if i == j { LOCAL_DISTANCE } else { REMOTE_DISTANCE })
                    .collect()
            })
            .collect();

        Self {
            node_count,
            distances,
            available: node_count > 0,
            current: AtomicU32::new(0),
            failing: Mutex::new(HashSet::new()),
            owners: Mutex::new(HashMap::new()),
            live: (0..n).map(|_| AtomicUsize::new(0)).collect(),
            attempts: (0..n).map(|_| AtomicUsize::new(0)).collect(),
            memory: SystemAllocator,
        }
    }

    /// Replace the distance matrix. Must be `node_count x node_count`.
    pub fn with_distances(mut self, distances: Vec<Vec<u32>>) -> Result<Self> {
        let n = self.node_count as usize;
        if distances.len() != n || distances.iter().any(|row| row.len() != n) {
            return Err(Error::config(format!(
                "distance matrix must be {n}x{n}"
            )));
        }
        self.distances = distances;
        Ok(self)
    }

    /// Node the "calling thread" is reported to run on.
    pub fn with_current_node(self, node: NodeId) -> Self {
        self.set_current_node(node);
        self
    }

    pub fn with_failing_node(self, node: NodeId) -> Self {
        self.fail_node(node);
        self
    }

    /// Make the availability probe fail.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn set_current_node(&self, node: NodeId) {
        self.current.store(node.get(), Ordering::Relaxed);
    }

    /// Every later allocation on `node` fails until [`restore_node`] is called.
    ///
    /// [`restore_node`]: SimulatedNuma::restore_node
    pub fn fail_node(&self, node: NodeId) {
        self.failing.lock().insert(node);
    }

    pub fn restore_node(&self, node: NodeId) {
        self.failing.lock().remove(&node);
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Blocks currently held on `node`.
    pub fn live_allocations(&self, node: NodeId) -> usize {
        self.live
            .get(node.index())
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Allocation attempts made against `node`, successful or not.
    pub fn attempts(&self, node: NodeId) -> usize {
        self.attempts
            .get(node.index())
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    fn accepts(&self, node: NodeId) -> bool {
        node.get() < self.node_count && !self.failing.lock().contains(&node)
    }
}

impl NumaBackend for SimulatedNuma {
    fn is_available(&self) -> bool {
        self.available
    }

    fn max_node(&self) -> Option<NodeId> {
        self.node_count.checked_sub(1).map(NodeId)
    }

    fn nodes(&self) -> Vec<NodeId> {
        (0..self.node_count).map(NodeId).collect()
    }

    fn distance(&self, from: NodeId, to: NodeId) -> u32 {
        self.distances
            .get(from.index())
            .and_then(|row| row.get(to.index()))
            .copied()
            .unwrap_or(u32::MAX)
    }

    fn current_node(&self) -> Option<NodeId> {
        let node = NodeId(self.current.load(Ordering::Relaxed));
        (node.get() < self.node_count).then_some(node)
    }

    fn alloc_on_node(&self, size: usize, node: NodeId) -> Option<NonNull<u8>> {
        if let Some(counter) = self.attempts.get(node.index()) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        if !self.accepts(node) {
            return None;
        }

        let ptr = self.memory.allocate(size)?;
        self.owners.lock().insert(ptr.as_ptr() as usize, node);
        self.live[node.index()].fetch_add(1, Ordering::Relaxed);
        Some(ptr)
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // Held across the resize: the old address may be reused as soon as
        // the system allocator frees it.
        let mut owners = self.owners.lock();
        let node = *owners.get(&(ptr.as_ptr() as usize))?;
        if !self.accepts(node) {
            return None;
        }

        let new_ptr = self.memory.reallocate(ptr, old_size, new_size)?;
        owners.remove(&(ptr.as_ptr() as usize));
        owners.insert(new_ptr.as_ptr() as usize, node);
        Some(new_ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        if let Some(node) = self.owners.lock().remove(&(ptr.as_ptr() as usize)) {
            self.live[node.index()].fetch_sub(1, Ordering::Relaxed);
        }
        self.memory.deallocate(ptr, size);
    }
}
