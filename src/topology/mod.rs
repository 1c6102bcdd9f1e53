//! NUMA topology discovery and the distance-ordered node directory.
//!
//! All platform access goes through [`NumaBackend`]. [`SystemNuma`] talks to
//! the kernel, [`SimulatedNuma`] is a software topology used by tests and
//! benchmarks. [`TopologyDirectory`] caches one [`TopologySnapshot`] per
//! allocator context.

pub mod simulated;
pub mod system;

pub use simulated::SimulatedNuma;
pub use system::SystemNuma;

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Identifier of a NUMA node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Raw node number
    pub const fn get(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        NodeId(id)
    }
}

/// Platform NUMA interface: topology queries plus the node-targeted
/// allocation primitive.
pub trait NumaBackend: Send + Sync + fmt::Debug {
    /// Whether the NUMA subsystem can be used at all.
    fn is_available(&self) -> bool;

    /// Highest node id the platform knows about.
    fn max_node(&self) -> Option<NodeId>;

    /// Valid (online) node ids, ascending.
    fn nodes(&self) -> Vec<NodeId>;

    /// Relative access cost between two nodes. Lower is closer.
    fn distance(&self, from: NodeId, to: NodeId) -> u32;

    /// Node of the CPU the calling thread is running on right now.
    fn current_node(&self) -> Option<NodeId>;

    /// Allocate `size` bytes bound to `node`. The returned memory is aligned
    /// to at least [`MIN_ALIGN`](crate::memory::MIN_ALIGN).
    fn alloc_on_node(&self, size: usize, node: NodeId) -> Option<NonNull<u8>>;

    /// Resize a block obtained from this backend. Node placement of the
    /// resized block is not guaranteed to match the original.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc_on_node` or `realloc` on this backend and
    /// `old_size` must be the size it was requested with.
    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>>;

    /// Release a block obtained from this backend.
    ///
    /// # Safety
    ///
    /// Same provenance rules as [`NumaBackend::realloc`].
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize);

    /// Bytes actually reserved for the block at `ptr`, requested with
    /// `size`. The default reports the requested size.
    ///
    /// # Safety
    ///
    /// Same provenance rules as [`NumaBackend::realloc`].
    unsafe fn usable_size(&self, _ptr: NonNull<u8>, size: usize) -> usize {
        size
    }
}

/// Cached view of the topology, taken once at initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySnapshot {
    numa_available: bool,
    reference_node: Option<NodeId>,
    default_node: Option<NodeId>,
    max_node: Option<NodeId>,
    by_distance: Vec<NodeId>,
}

impl TopologySnapshot {
    /// Snapshot describing a process without usable NUMA.
    pub fn unavailable() -> Self {
        Self {
            numa_available: false,
            reference_node: None,
            default_node: None,
            max_node: None,
            by_distance: Vec::new(),
        }
    }

    /// Probe the backend and rank its nodes by distance from the node the
    /// calling thread currently runs on.
    pub fn discover(backend: &dyn NumaBackend) -> Self {
        if !backend.is_available() {
            return Self::unavailable();
        }

        let mut nodes = backend.nodes();
        if nodes.is_empty() {
            return Self::unavailable();
        }

        let reference = backend
            .current_node()
            .filter(|n| nodes.contains(n))
            .unwrap_or(nodes[0]);

        nodes.sort_by_key(|&n| (backend.distance(reference, n), n));

        let max_node = backend
            .max_node()
            .or_else(|| nodes.iter().copied().max());

        Self {
            numa_available: true,
            reference_node: Some(reference),
            default_node: Some(reference),
            max_node,
            by_distance: nodes,
        }
    }

    pub fn numa_available(&self) -> bool {
        self.numa_available
    }

    /// Node the ordering was computed from.
    pub fn reference_node(&self) -> Option<NodeId> {
        self.reference_node
    }

    pub fn default_node(&self) -> Option<NodeId> {
        self.default_node
    }

    pub fn max_node(&self) -> Option<NodeId> {
        self.max_node
    }

    /// Valid nodes, nearest first.
    pub fn nodes_by_distance(&self) -> &[NodeId] {
        &self.by_distance
    }

    fn with_default_node(&self, node: NodeId) -> Self {
        Self {
            default_node: Some(node),
            ..self.clone()
        }
    }
}

/// Per-context owner of the topology snapshot.
///
/// The snapshot is built on first use and kept until [`cleanup`] is called.
/// Once discovery finds no usable node, NUMA stays disabled for the life of
/// the directory, even across `cleanup`.
///
/// [`cleanup`]: TopologyDirectory::cleanup
#[derive(Debug)]
pub struct TopologyDirectory {
    backend: Arc<dyn NumaBackend>,
    snapshot: RwLock<Option<Arc<TopologySnapshot>>>,
    disabled: AtomicBool,
    preferred_node: Option<NodeId>,
}

impl TopologyDirectory {
    pub fn new(backend: Arc<dyn NumaBackend>) -> Self {
        Self {
            backend,
            snapshot: RwLock::new(None),
            disabled: AtomicBool::new(false),
            preferred_node: None,
        }
    }

    /// Directory that never reports NUMA as available.
    pub fn disabled(backend: Arc<dyn NumaBackend>) -> Self {
        let directory = Self::new(backend);
        directory.disabled.store(true, Ordering::Release);
        directory
    }

    /// Default node applied after every discovery, when valid.
    pub fn with_preferred_node(mut self, node: Option<NodeId>) -> Self {
        self.preferred_node = node;
        self
    }

    pub fn backend(&self) -> &dyn NumaBackend {
        self.backend.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.snapshot.read().is_some()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Build the snapshot if there is none yet. Idempotent.
    pub fn initialize(&self) -> Arc<TopologySnapshot> {
        let mut slot = self.snapshot.write();
        if let Some(snapshot) = slot.as_ref() {
            return Arc::clone(snapshot);
        }

        let snapshot = Arc::new(self.build());
        *slot = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// Discover a fresh snapshot. Callers hold the write lock.
    fn build(&self) -> TopologySnapshot {
        if self.is_disabled() {
            return TopologySnapshot::unavailable();
        }

        let discovered = TopologySnapshot::discover(self.backend.as_ref());
        if discovered.numa_available() {
            tracing::info!(
                nodes = ?discovered.nodes_by_distance(),
                default_node = ?discovered.default_node(),
                "NUMA support enabled"
            );
            self.apply_preferred(discovered)
        } else {
            self.disabled.store(true, Ordering::Release);
            tracing::warn!("NUMA not available, using standard allocation");
            discovered
        }
    }

    fn apply_preferred(&self, snapshot: TopologySnapshot) -> TopologySnapshot {
        match self.preferred_node {
            Some(node) if snapshot.nodes_by_distance().contains(&node) => {
                snapshot.with_default_node(node)
            }
            Some(node) => {
                tracing::warn!(%node, "configured default node is not online, keeping nearest node");
                snapshot
            }
            None => snapshot,
        }
    }

    /// Current snapshot, initializing lazily.
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        if let Some(snapshot) = self.snapshot.read().as_ref() {
            return Arc::clone(snapshot);
        }
        self.initialize()
    }

    pub fn nodes_by_distance(&self) -> Vec<NodeId> {
        self.snapshot().nodes_by_distance().to_vec()
    }

    /// `None` means NUMA is unavailable.
    pub fn current_node(&self) -> Option<NodeId> {
        self.snapshot().default_node()
    }

    /// Change the default node. Out-of-range input is reported and leaves the
    /// directory untouched.
    pub fn set_default_node(&self, node: NodeId) -> Result<()> {
        // Validate and replace under one write lock so a concurrent cleanup
        // is never undone by a stale snapshot.
        let mut slot = self.snapshot.write();
        let current = match slot.as_ref() {
            Some(snapshot) => Arc::clone(snapshot),
            None => {
                let snapshot = Arc::new(self.build());
                *slot = Some(Arc::clone(&snapshot));
                snapshot
            }
        };

        let Some(max_node) = current.max_node().filter(|_| current.numa_available()) else {
            tracing::warn!(%node, "cannot set default NUMA node, NUMA not available");
            return Err(Error::NumaUnavailable);
        };

        if node > max_node {
            tracing::warn!(%node, %max_node, "invalid NUMA node");
            return Err(Error::InvalidNode { node, max_node });
        }

        *slot = Some(Arc::new(current.with_default_node(node)));
        tracing::info!(%node, "default NUMA node set");
        Ok(())
    }

    /// Drop the cached snapshot. The next use rediscovers the topology from
    /// the calling thread's location.
    pub fn cleanup(&self) {
        if self.snapshot.write().take().is_some() {
            tracing::debug!("NUMA topology released");
        }
    }
}

/// Parse a kernel list such as `0-3,8,10-11`.
pub(crate) fn parse_list(s: &str) -> Vec<u32> {
    let mut out = Vec::new();
    for part in s.trim().split(',').filter(|p| !p.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(s), Ok(e)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>()) {
                out.extend(s..=e);
            }
        } else if let Ok(n) = part.trim().parse::<u32>() {
            out.push(n);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_nodes() -> Arc<SimulatedNuma> {
        Arc::new(
            SimulatedNuma::new(3)
                .with_distances(vec![
                    vec![10, 30, 20],
                    vec![30, 10, 20],
                    vec![20, 20, 10],
                ])
                .unwrap(),
        )
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("0-3,8,10-11\n"), vec![0, 1, 2, 3, 8, 10, 11]);
        assert_eq!(parse_list("0"), vec![0]);
        assert!(parse_list("").is_empty());
        assert_eq!(parse_list("1,x,3"), vec![1, 3]);
    }

    #[test]
    fn test_discover_orders_by_distance() {
        let backend = three_nodes();
        let snapshot = TopologySnapshot::discover(backend.as_ref());

        assert!(snapshot.numa_available());
        assert_eq!(snapshot.reference_node(), Some(NodeId(0)));
        assert_eq!(snapshot.nodes_by_distance(), &[NodeId(0), NodeId(2), NodeId(1)]);
        assert_eq!(snapshot.max_node(), Some(NodeId(2)));
    }

    #[test]
    fn test_discover_breaks_ties_by_id() {
        let backend = SimulatedNuma::new(4).with_current_node(NodeId(2));
        let snapshot = TopologySnapshot::discover(&backend);

        assert_eq!(
            snapshot.nodes_by_distance(),
            &[NodeId(2), NodeId(0), NodeId(1), NodeId(3)]
        );
        assert_eq!(snapshot.default_node(), Some(NodeId(2)));
    }

    #[test]
    fn test_unavailable_backend() {
        let backend = SimulatedNuma::new(2).unavailable();
        let snapshot = TopologySnapshot::discover(&backend);

        assert!(!snapshot.numa_available());
        assert!(snapshot.nodes_by_distance().is_empty());
        assert_eq!(snapshot.default_node(), None);
    }

    #[test]
    fn test_directory_is_lazy_and_idempotent() {
        let directory = TopologyDirectory::new(three_nodes());
        assert!(!directory.is_initialized());

        let first = directory.initialize();
        let second = directory.initialize();
        assert!(directory.is_initialized());
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_ordering_survives_migration_until_cleanup() {
        let backend = three_nodes();
        let directory = TopologyDirectory::new(backend.clone());

        assert_eq!(directory.nodes_by_distance()[0], NodeId(0));

        backend.set_current_node(NodeId(1));
        assert_eq!(directory.nodes_by_distance()[0], NodeId(0));

        directory.cleanup();
        assert!(!directory.is_initialized());
        assert_eq!(
            directory.nodes_by_distance(),
            vec![NodeId(1), NodeId(2), NodeId(0)]
        );
    }

    #[test]
    fn test_disable_is_sticky() {
        let directory = TopologyDirectory::new(Arc::new(SimulatedNuma::new(2).unavailable()));
        assert_eq!(directory.current_node(), None);
        assert!(directory.is_disabled());

        directory.cleanup();
        assert_eq!(directory.current_node(), None);
    }

    #[test]
    fn test_set_default_node() {
        let directory = TopologyDirectory::new(three_nodes());
        assert_eq!(directory.current_node(), Some(NodeId(0)));

        directory.set_default_node(NodeId(2)).unwrap();
        assert_eq!(directory.current_node(), Some(NodeId(2)));

        let err = directory.set_default_node(NodeId(3)).unwrap_err();
        assert!(matches!(err, Error::InvalidNode { .. }));
        assert_eq!(directory.current_node(), Some(NodeId(2)));
    }

    #[test]
    fn test_set_default_node_without_numa() {
        let directory = TopologyDirectory::disabled(three_nodes());
        assert!(matches!(
            directory.set_default_node(NodeId(0)),
            Err(Error::NumaUnavailable)
        ));
        assert_eq!(directory.current_node(), None);
    }

    #[test]
    fn test_preferred_node() {
        let directory =
            TopologyDirectory::new(three_nodes()).with_preferred_node(Some(NodeId(1)));
        assert_eq!(directory.current_node(), Some(NodeId(1)));
        assert_eq!(directory.nodes_by_distance()[0], NodeId(0));

        let directory =
            TopologyDirectory::new(three_nodes()).with_preferred_node(Some(NodeId(7)));
        assert_eq!(directory.current_node(), Some(NodeId(0)));
    }

    #[test]
    fn test_preferred_node_survives_cleanup() {
        let backend = three_nodes();
        let directory =
            TopologyDirectory::new(backend.clone()).with_preferred_node(Some(NodeId(1)));
        assert_eq!(directory.current_node(), Some(NodeId(1)));

        directory.set_default_node(NodeId(2)).unwrap();
        backend.set_current_node(NodeId(2));
        directory.cleanup();

        assert_eq!(directory.current_node(), Some(NodeId(1)));
        assert_eq!(directory.nodes_by_distance()[0], NodeId(2));
    }

    #[test]
    fn test_set_default_node_after_cleanup_rediscovers() {
        let backend = three_nodes();
        let directory = TopologyDirectory::new(backend.clone());
        assert_eq!(directory.nodes_by_distance()[0], NodeId(0));

        backend.set_current_node(NodeId(1));
        directory.cleanup();

        directory.set_default_node(NodeId(2)).unwrap();
        assert!(directory.is_initialized());
        assert_eq!(directory.current_node(), Some(NodeId(2)));
        assert_eq!(
            directory.nodes_by_distance(),
            vec![NodeId(1), NodeId(2), NodeId(0)]
        );
    }
}
