//! Kernel-backed NUMA topology (Linux).
//!
//! Topology comes from sysfs, placement from `mbind(2)` on anonymous
//! mappings. On other platforms the backend reports NUMA as unavailable and
//! every allocation falls through to the standard allocator.

use super::{NodeId, NumaBackend};
use crate::error::Result;
use std::ptr::NonNull;

#[cfg(target_os = "linux")]
const NODE_ROOT: &str = "/sys/devices/system/node";

/// Kernel NUMA backend, probed once at construction.
#[derive(Debug, Clone)]
pub struct SystemNuma {
    available: bool,
    nodes: Vec<NodeId>,
    distances: Vec<Vec<u32>>,
    cpu_nodes: Vec<Option<NodeId>>,
    page_size: usize,
}

impl SystemNuma {
    /// Probe the running kernel. Unreadable sysfs state is logged and
    /// reported as "NUMA unavailable".
    pub fn detect() -> Self {
        Self::try_detect().unwrap_or_else(|err| {
            tracing::debug!(error = %err, "cannot read NUMA topology");
            Self::unavailable()
        })
    }

    /// Probe the running kernel, surfacing sysfs read failures as
    /// [`Error::Io`](crate::Error::Io).
    pub fn try_detect() -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            linux::detect(std::path::Path::new(NODE_ROOT))
        }

        #[cfg(not(target_os = "linux"))]
        {
            Ok(Self::unavailable())
        }
    }

    /// Backend that never reports NUMA support.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            nodes: Vec::new(),
            distances: Vec::new(),
            cpu_nodes: Vec::new(),
            page_size: 4096,
        }
    }

    fn round_to_page(&self, size: usize) -> usize {
        let page = self.page_size.max(1);
        size.max(1).div_ceil(page).saturating_mul(page)
    }
}

impl Default for SystemNuma {
    fn default() -> Self {
        Self::detect()
    }
}

impl NumaBackend for SystemNuma {
    fn is_available(&self) -> bool {
        self.available
    }

    fn max_node(&self) -> Option<NodeId> {
        self.nodes.iter().copied().max()
    }

    fn nodes(&self) -> Vec<NodeId> {
        self.nodes.clone()
    }

    fn distance(&self, from: NodeId, to: NodeId) -> u32 {
        let fallback = if from == to { 10 } else { 20 };
        // sysfs rows are ordered like the online list, not by raw id
        let position = |node| self.nodes.iter().position(|&n| n == node);
        let (Some(row), Some(col)) = (position(from), position(to)) else {
            return fallback;
        };
        self.distances
            .get(row)
            .and_then(|d| d.get(col))
            .copied()
            .unwrap_or(fallback)
    }

    fn current_node(&self) -> Option<NodeId> {
        #[cfg(target_os = "linux")]
        {
            let cpu = unsafe { libc::sched_getcpu() };
            if cpu < 0 {
                return None;
            }
            self.cpu_nodes.get(cpu as usize).copied().flatten()
        }

        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }

    fn alloc_on_node(&self, size: usize, node: NodeId) -> Option<NonNull<u8>> {
        if !self.available {
            return None;
        }

        #[cfg(target_os = "linux")]
        {
            linux::map_on_node(self.round_to_page(size), node)
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = (size, node);
            None
        }
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        #[cfg(target_os = "linux")]
        {
            linux::remap(ptr, self.round_to_page(old_size), self.round_to_page(new_size))
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = (ptr, old_size, new_size);
            None
        }
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        #[cfg(target_os = "linux")]
        {
            linux::unmap(ptr, self.round_to_page(size));
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = (ptr, size);
        }
    }

    unsafe fn usable_size(&self, _ptr: NonNull<u8>, size: usize) -> usize {
        self.round_to_page(size)
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::SystemNuma;
    use crate::error::Result;
    use crate::topology::{parse_list, NodeId};
    use std::ffi::c_void;
    use std::fs;
    use std::path::Path;
    use std::ptr::{self, NonNull};

    const MPOL_BIND: libc::c_int = 2;
    const MASK_WORDS: usize = 16;
    const MASK_BITS: usize = MASK_WORDS * libc::c_ulong::BITS as usize;

    /// `get_mempolicy(NULL, NULL, 0, 0, 0)` returns 0 when the kernel has
    /// NUMA policy support.
    fn probe() -> bool {
        let rc = unsafe {
            libc::syscall(
                libc::SYS_get_mempolicy,
                ptr::null_mut::<libc::c_int>(),
                ptr::null_mut::<libc::c_ulong>(),
                0 as libc::c_ulong,
                ptr::null_mut::<c_void>(),
                0 as libc::c_ulong,
            )
        };
        rc == 0
    }

    pub(super) fn detect(root: &Path) -> Result<SystemNuma> {
        let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            n if n > 0 => n as usize,
            _ => 4096,
        };

        if !probe() {
            tracing::debug!("get_mempolicy probe failed");
            return Ok(SystemNuma {
                page_size,
                ..SystemNuma::unavailable()
            });
        }

        let nodes = read_nodes(root)?;
        let distances = nodes.iter().map(|&n| read_distances(root, n)).collect();

        let mut cpu_nodes: Vec<Option<NodeId>> = Vec::new();
        for &node in &nodes {
            let Ok(content) = fs::read_to_string(root.join(format!("node{node}/cpulist"))) else {
                continue;
            };
            for cpu in parse_list(&content) {
                let cpu = cpu as usize;
                if cpu >= cpu_nodes.len() {
                    cpu_nodes.resize(cpu + 1, None);
                }
                cpu_nodes[cpu] = Some(node);
            }
        }

        tracing::debug!(nodes = nodes.len(), cpus = cpu_nodes.len(), "probed NUMA topology");

        Ok(SystemNuma {
            available: !nodes.is_empty(),
            nodes,
            distances,
            cpu_nodes,
            page_size,
        })
    }

    /// Online node ids from `<root>/online`.
    pub(super) fn read_nodes(root: &Path) -> Result<Vec<NodeId>> {
        let content = fs::read_to_string(root.join("online"))?;
        Ok(parse_list(&content).into_iter().map(NodeId).collect())
    }

    fn read_distances(root: &Path, node: NodeId) -> Vec<u32> {
        fs::read_to_string(root.join(format!("node{node}/distance")))
            .map(|content| {
                content
                    .split_whitespace()
                    .filter_map(|d| d.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(super) fn map_on_node(len: usize, node: NodeId) -> Option<NonNull<u8>> {
        if node.index() >= MASK_BITS {
            return None;
        }

        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return None;
        }

        let mut mask = [0 as libc::c_ulong; MASK_WORDS];
        let word_bits = libc::c_ulong::BITS as usize;
        mask[node.index() / word_bits] = 1 << (node.index() % word_bits);

        let rc = unsafe {
            libc::syscall(
                libc::SYS_mbind,
                addr,
                len as libc::c_ulong,
                MPOL_BIND,
                mask.as_ptr(),
                (MASK_BITS + 1) as libc::c_ulong,
                0 as libc::c_uint,
            )
        };
        if rc != 0 {
            tracing::debug!(%node, "mbind failed");
            unsafe { libc::munmap(addr, len) };
            return None;
        }

        NonNull::new(addr.cast::<u8>())
    }

    pub(super) unsafe fn remap(ptr: NonNull<u8>, old_len: usize, new_len: usize) -> Option<NonNull<u8>> {
        if old_len == new_len {
            return Some(ptr);
        }
        let addr = libc::mremap(
            ptr.as_ptr().cast::<c_void>(),
            old_len,
            new_len,
            libc::MREMAP_MAYMOVE,
        );
        if addr == libc::MAP_FAILED {
            return None;
        }
        NonNull::new(addr.cast::<u8>())
    }

    pub(super) unsafe fn unmap(ptr: NonNull<u8>, len: usize) {
        if libc::munmap(ptr.as_ptr().cast::<c_void>(), len) != 0 {
            tracing::error!(len, "munmap failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_backend() {
        let numa = SystemNuma::unavailable();
        assert!(!numa.is_available());
        assert!(numa.alloc_on_node(64, NodeId(0)).is_none());
        assert_eq!(numa.max_node(), None);
    }

    #[test]
    fn test_page_rounding() {
        let numa = SystemNuma::unavailable();
        assert_eq!(numa.round_to_page(1), 4096);
        assert_eq!(numa.round_to_page(4096), 4096);
        assert_eq!(numa.round_to_page(4097), 8192);
        assert_eq!(numa.round_to_page(0), 4096);
    }

    #[test]
    fn test_detect_is_consistent() {
        let numa = SystemNuma::detect();
        if numa.is_available() {
            assert!(!numa.nodes().is_empty());
            assert!(numa.max_node().is_some());
        } else {
            assert!(numa.nodes().is_empty());
        }
    }

    #[test]
    fn test_try_detect_matches_detect() {
        match SystemNuma::try_detect() {
            Ok(numa) => assert_eq!(numa.is_available(), SystemNuma::detect().is_available()),
            Err(err) => {
                assert!(matches!(err, crate::Error::Io(_)));
                assert!(!SystemNuma::detect().is_available());
            }
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_missing_sysfs_is_io_error() {
        let err = linux::read_nodes(std::path::Path::new("/nonexistent/numalloc/node")).unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_map_on_first_node() {
        let numa = SystemNuma::detect();
        if !numa.is_available() {
            return;
        }
        let node = numa.nodes()[0];
        // mbind can be refused inside containers; only exercise the path.
        if let Some(ptr) = numa.alloc_on_node(100, node) {
            unsafe {
                ptr.as_ptr().write(7);
                let ptr = numa.realloc(ptr, 100, 10_000).unwrap();
                assert_eq!(*ptr.as_ptr(), 7);
                numa.free(ptr, 10_000);
            }
        }
    }
}
