//! numalloc - NUMA-aware placement and usage accounting for allocations
//!
//! A thin layer over a standard allocator that places memory on NUMA nodes,
//! keeps a running total of allocated bytes, and falls back to the standard
//! allocator whenever node-targeted allocation is not possible.
//!
//! # Quick Start
//!
//! ```no_run
//! use numalloc::prelude::*;
//!
//! let allocator = NumaAllocator::new(Config::default()).unwrap();
//! allocator.set_placement_policy(PlacementPolicy::DistanceFirst);
//!
//! let mut block = allocator.allocate(64).unwrap();
//! block[..5].copy_from_slice(b"hello");
//!
//! let block = allocator.reallocate(Some(block), 128).unwrap();
//! println!("used: {} bytes, node: {:?}", allocator.used_memory(), block.node());
//!
//! allocator.release(block);
//! ```
//!
//! # Features
//!
//! - **Topology Directory**: distance-ordered node list, discovered lazily
//! - **Placement Policies**: default node or nearest-first with fallback
//! - **Usage Ledger**: byte accounting with an opt-in locked mode
//! - **Pluggable Backends**: kernel NUMA or a simulated topology for tests
//! - **Telemetry**: allocation counters and request-size histogram (optional)

// Lint configuration
#![warn(missing_debug_implementations)]

pub mod allocator;
pub mod config;
pub mod error;
pub mod global;
pub mod ledger;
pub mod memory;
pub mod policy;
pub mod prelude;
pub mod telemetry;
pub mod topology;

// Re-export key types at crate root
pub use allocator::NumaAllocator;
pub use config::{Config, ConfigBuilder, OomStrategy};
pub use error::{Error, Result};
pub use memory::{Block, Origin, SizeTracking, HEADER_SIZE};
pub use policy::PlacementPolicy;
pub use topology::{NodeId, NumaBackend, SimulatedNuma, SystemNuma};
