//! Cluster API client contract (spec §6, C2).

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;

use crate::core::common::Resources;
use crate::core::demand::UnschedulableDemand;
use crate::core::node::OwnedNode;
use crate::error::Result;

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Sum of unmet requests across pods failing with "Insufficient
    /// cpu"/"Insufficient memory" only.
    async fn list_unschedulable_demand(&self) -> Result<UnschedulableDemand>;

    /// True when every unschedulable pod's sole cause is a control-plane
    /// taint rather than a resource shortage (spec §4.5 step 1 guard).
    async fn is_taint_blocked(&self) -> Result<bool>;

    async fn list_owned_nodes(&self, pattern: &regex::Regex) -> Result<Vec<OwnedNode>>;

    async fn list_allocations(
        &self,
        nodes: &[OwnedNode],
    ) -> Result<BTreeMap<String, Resources>>;

    /// Owned nodes carrying zero allocated resources — victim-selection's
    /// preferred pool (spec §4.2).
    async fn list_empty_nodes(&self, pattern: &regex::Regex) -> Result<Vec<OwnedNode>>;

    /// Polls until `name` reports `Ready=True` or `deadline` elapses.
    async fn await_ready(&self, name: &str, deadline: Instant) -> Result<bool>;

    async fn cordon(&self, name: &str) -> Result<()>;

    /// Evicts every pod on the node. DaemonSet-managed and mirror pods are
    /// surfaced by the client as non-evictable and must be skipped, not
    /// treated as a failure.
    async fn evict_all_pods(&self, name: &str) -> Result<()>;

    async fn delete_node(&self, name: &str) -> Result<()>;
}
