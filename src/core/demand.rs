//! `UnschedulableDemand` and `AllocatedResources` (spec §3).

use std::collections::BTreeMap;

/// Summed unmet requests across pods whose scheduling failed for
/// "Insufficient cpu" or "Insufficient memory".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UnschedulableDemand {
    pub cpu: f64,
    pub memory_bytes: u64,
}

impl UnschedulableDemand {
    pub fn is_zero(&self) -> bool {
        self.cpu <= 0.0 && self.memory_bytes == 0
    }
}

/// Per-owned-node allocation: sum of container resource *requests* on that
/// node, keyed by node name.
pub type AllocatedResources = BTreeMap<String, crate::core::common::Resources>;

/// Sums allocations across all owned nodes.
pub fn total_allocated(allocations: &AllocatedResources) -> crate::core::common::Resources {
    allocations.values().fold(
        crate::core::common::Resources::default(),
        |acc, r| crate::core::common::Resources {
            cpu: acc.cpu + r.cpu,
            memory_bytes: acc.memory_bytes + r.memory_bytes,
        },
    )
}
