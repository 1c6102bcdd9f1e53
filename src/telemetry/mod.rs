//! Allocation telemetry.
//!
//! Counts allocations per primitive, placement failures and fallbacks, and
//! keeps a histogram of request sizes.

#[cfg(feature = "telemetry")]
pub mod stats;

#[cfg(feature = "telemetry")]
pub use stats::{AllocStats, AllocStatsSnapshot};

// Stub implementations when telemetry is disabled
#[cfg(not(feature = "telemetry"))]
pub mod stats {
    use crate::memory::Origin;

    #[derive(Debug, Default)]
    pub struct AllocStats;

    impl AllocStats {
        pub fn new() -> Self { Self }
        pub fn record_allocation(&self, _: usize, _: Origin) {}
        pub fn record_release(&self) {}
        pub fn record_reallocation(&self) {}
        pub fn record_candidate_failure(&self) {}
        pub fn record_fallback(&self) {}
        pub fn record_out_of_memory(&self) {}
        pub fn snapshot(&self) -> AllocStatsSnapshot { AllocStatsSnapshot::default() }
        pub fn reset(&self) {}
    }

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
}

#[cfg(not(feature = "telemetry"))]
pub use stats::{AllocStats, AllocStatsSnapshot};
