//! Allocation statistics.

use crate::memory::Origin;
use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Largest request size tracked by the size histogram (1 TiB).
const MAX_TRACKED_SIZE: u64 = 1 << 40;

/// Allocation counters for one allocator context.
#[derive(Debug)]
pub struct AllocStats {
    allocations: AtomicU64,
    releases: AtomicU64,
    reallocations: AtomicU64,
    numa_allocations: AtomicU64,
    standard_allocations: AtomicU64,
    candidate_failures: AtomicU64,
    standard_fallbacks: AtomicU64,
    out_of_memory: AtomicU64,

    // Request sizes (protected by RwLock for interior mutability)
    request_sizes: RwLock<Histogram<u64>>,

    start_time: Instant,
}

impl AllocStats {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_max(MAX_TRACKED_SIZE, 2)
            .expect("static histogram bounds are valid");

        Self {
            allocations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            reallocations: AtomicU64::new(0),
            numa_allocations: AtomicU64::new(0),
            standard_allocations: AtomicU64::new(0),
            candidate_failures: AtomicU64::new(0),
            standard_fallbacks: AtomicU64::new(0),
            out_of_memory: AtomicU64::new(0),
            request_sizes: RwLock::new(histogram),
            start_time: Instant::now(),
        }
    }

    pub fn record_allocation(&self, size: usize, origin: Origin) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        match origin {
            Origin::Node(_) => self.numa_allocations.fetch_add(1, Ordering::Relaxed),
            Origin::Standard => self.standard_allocations.fetch_add(1, Ordering::Relaxed),
        };

        // Skip the sample rather than wait on a contended histogram
        if let Some(mut hist) = self.request_sizes.try_write() {
            let _ = hist.record((size as u64).clamp(1, MAX_TRACKED_SIZE));
        }
    }

    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reallocation(&self) {
        self.reallocations.fetch_add(1, Ordering::Relaxed);
    }

    /// A placement candidate returned no memory.
    pub fn record_candidate_failure(&self) {
        self.candidate_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Every candidate failed and the standard primitive was used instead.
    pub fn record_fallback(&self) {
        self.standard_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_out_of_memory(&self) {
        self.out_of_memory.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AllocStatsSnapshot {
        let histogram = self.request_sizes.read();

        AllocStatsSnapshot {
            uptime: self.start_time.elapsed(),
            allocations: self.allocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            reallocations: self.reallocations.load(Ordering::Relaxed),
            numa_allocations: self.numa_allocations.load(Ordering::Relaxed),
            standard_allocations: self.standard_allocations.load(Ordering::Relaxed),
            candidate_failures: self.candidate_failures.load(Ordering::Relaxed),
            standard_fallbacks: self.standard_fallbacks.load(Ordering::Relaxed),
            out_of_memory: self.out_of_memory.load(Ordering::Relaxed),
            p50_request_size: histogram.value_at_quantile(0.50),
            p99_request_size: histogram.value_at_quantile(0.99),
            max_request_size: histogram.max(),
        }
    }

    pub fn reset(&self) {
        self.allocations.store(0, Ordering::Relaxed);
        self.releases.store(0, Ordering::Relaxed);
        self.reallocations.store(0, Ordering::Relaxed);
        self.numa_allocations.store(0, Ordering::Relaxed);
        self.standard_allocations.store(0, Ordering::Relaxed);
        self.candidate_failures.store(0, Ordering::Relaxed);
        self.standard_fallbacks.store(0, Ordering::Relaxed);
        self.out_of_memory.store(0, Ordering::Relaxed);

        if let Some(mut hist) = self.request_sizes.try_write() {
            hist.reset();
        }
    }
}

impl Default for AllocStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`AllocStats`].
#[derive(Debug, Clone, Default)]
pub struct AllocStatsSnapshot {
    pub uptime: std::time::Duration,
    pub allocations: u64,
    pub releases: u64,
    pub reallocations: u64,
    pub numa_allocations: u64,
    pub standard_allocations: u64,
    pub candidate_failures: u64,
    pub standard_fallbacks: u64,
    pub out_of_memory: u64,
    pub p50_request_size: u64,
    pub p99_request_size: u64,
    pub max_request_size: u64,
}

impl AllocStatsSnapshot {
    /// Blocks allocated and not yet released.
    pub fn live_blocks(&self) -> u64 {
        self.allocations.saturating_sub(self.releases)
    }

    /// Fraction of allocations that landed on a NUMA node (0.0 to 1.0).
    pub fn numa_ratio(&self) -> f64 {
        if self.allocations == 0 {
            return 0.0;
        }
        self.numa_allocations as f64 / self.allocations as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::NodeId;

    #[test]
    fn test_stats_basic() {
        let stats = AllocStats::new();

        stats.record_allocation(64, Origin::Node(NodeId(0)));
        stats.record_allocation(4096, Origin::Standard);
        stats.record_candidate_failure();
        stats.record_fallback();
        stats.record_release();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.allocations, 2);
        assert_eq!(snapshot.numa_allocations, 1);
        assert_eq!(snapshot.standard_allocations, 1);
        assert_eq!(snapshot.candidate_failures, 1);
        assert_eq!(snapshot.standard_fallbacks, 1);
        assert_eq!(snapshot.live_blocks(), 1);
        assert_eq!(snapshot.numa_ratio(), 0.5);
        assert!(snapshot.max_request_size >= 4096);
    }

    #[test]
    fn test_stats_reset() {
        let stats = AllocStats::new();

        stats.record_allocation(10, Origin::Standard);
        assert_eq!(stats.snapshot().allocations, 1);

        stats.reset();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.allocations, 0);
        assert_eq!(snapshot.max_request_size, 0);
    }
}
