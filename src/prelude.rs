pub use crate::allocator::NumaAllocator;
pub use crate::config::{Config, ConfigBuilder, OomStrategy};
pub use crate::error::{Error, Result};
pub use crate::memory::{Block, Origin, SizeTracking};
pub use crate::policy::PlacementPolicy;
pub use crate::topology::{NodeId, NumaBackend, SimulatedNuma, SystemNuma};

pub use crate::telemetry::AllocStatsSnapshot;
