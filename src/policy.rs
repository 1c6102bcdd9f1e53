//! Placement policy engine.
//!
//! Turns a policy selection and an optional node hint into the ordered list of
//! nodes the allocator should try before falling back to the standard
//! primitive.

use crate::topology::{NodeId, TopologySnapshot};
use std::fmt;

/// Strategy used to pick the node(s) for an allocation without a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PlacementPolicy {
    /// The default node only.
    #[default]
    Default = 0,
    /// Every node, nearest first.
    DistanceFirst = 1,
    /// Reserved. Currently behaves like `Default`.
    RoundRobin = 2,
    /// Reserved. Currently behaves like `Default`.
    Balanced = 3,
}

impl PlacementPolicy {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => PlacementPolicy::DistanceFirst,
            2 => PlacementPolicy::RoundRobin,
            3 => PlacementPolicy::Balanced,
            _ => PlacementPolicy::Default,
        }
    }

    /// Whether the policy has its own placement logic yet.
    pub fn is_reserved(self) -> bool {
        matches!(self, PlacementPolicy::RoundRobin | PlacementPolicy::Balanced)
    }
}

impl fmt::Display for PlacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlacementPolicy::Default => "default",
            PlacementPolicy::DistanceFirst => "distance-first",
            PlacementPolicy::RoundRobin => "round-robin",
            PlacementPolicy::Balanced => "balanced",
        };
        f.write_str(name)
    }
}

/// Where to try an allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Try these nodes in order, then the standard primitive.
    Nodes(Vec<NodeId>),
    /// Skip NUMA and use the standard primitive directly.
    Standard,
}

/// Decide the candidate nodes for one allocation.
///
/// An explicit hint wins over the policy. Hints past the snapshot's max node
/// are passed through unchanged; the backend refuses them and the allocation
/// falls back to the standard primitive.
pub fn plan(policy: PlacementPolicy, hint: Option<NodeId>, topology: &TopologySnapshot) -> Placement {
    if !topology.numa_available() {
        return Placement::Standard;
    }

    if let Some(node) = hint {
        if topology.max_node().is_some_and(|max| node > max) {
            tracing::warn!(%node, max_node = ?topology.max_node(), "node hint out of range");
        }
        return Placement::Nodes(vec![node]);
    }

    match policy {
        PlacementPolicy::DistanceFirst if !topology.nodes_by_distance().is_empty() => {
            Placement::Nodes(topology.nodes_by_distance().to_vec())
        }
        // RoundRobin and Balanced are not implemented yet
        _ => match topology.default_node() {
            Some(node) => Placement::Nodes(vec![node]),
            None => Placement::Standard,
        },
    }
}
