//! Placement (spec §4.2, C5): host selection for a batch of CREATE events
//! and victim selection for a DESTROY event.

use crate::clients::hypervisor::{Host, HostStatus};
use crate::core::demand::AllocatedResources;
use crate::core::node::OwnedNode;
use crate::core::scale_event::ScaleEvent;

/// Assigns each CREATE event in `batch` the online host with the largest
/// free memory, tie-broken by largest free CPU. After each assignment the
/// chosen host's free totals are decremented by the new node's footprint
/// so the next event in the batch sees the hypothetical post-placement
/// view — otherwise every event in a batch would pick the same host.
///
/// Events that cannot be placed (no host fits) are left with
/// `target_host = None` and should be deferred to the next tick rather
/// than published.
pub fn place_batch(
    batch: &mut [ScaleEvent],
    hosts: &[Host],
    node_cores: f64,
    node_memory_bytes: u64,
) -> () {
    let mut working: Vec<Host> = hosts
        .iter()
        .filter(|h| h.status == HostStatus::Online)
        .cloned()
        .collect();

    for event in batch.iter_mut() {
        // Find the best-fitting host by index rather than `Iterator::max_by`,
        // which returns the *last* maximum on ties — we want the first
        // (lowest-indexed) host among equals so identical hosts fill in a
        // stable, predictable order.
        let mut best_idx: Option<usize> = None;
        for (idx, h) in working.iter().enumerate() {
            if h.mem_free_bytes < node_memory_bytes || h.cpu_free_cores < node_cores {
                continue;
            }
            best_idx = Some(match best_idx {
                None => idx,
                Some(current) => {
                    let current_host = &working[current];
                    let better = h.mem_free_bytes > current_host.mem_free_bytes
                        || (h.mem_free_bytes == current_host.mem_free_bytes
                            && h.cpu_free_cores > current_host.cpu_free_cores);
                    if better {
                        idx
                    } else {
                        current
                    }
                }
            });
        }

        match best_idx {
            Some(idx) => {
                let host = &mut working[idx];
                host.mem_free_bytes -= node_memory_bytes;
                host.cpu_free_cores -= node_cores;
                event.target_host = Some(host.id.clone());
            }
            None => {
                event.target_host = None;
            }
        }
    }
}

/// Weighted allocation metric used to rank victims: `cpu_cores +
/// memory_bytes / 1 MiB`. This is an unnormalized sum where memory in
/// bytes dominates — kept for parity with the source system (spec §9
/// design note) and exposed as a replaceable strategy via
/// [`VictimMetric`].
pub trait VictimMetric {
    fn weight(&self, resources: &crate::core::common::Resources) -> f64;
}

pub struct DefaultVictimMetric;

impl VictimMetric for DefaultVictimMetric {
    fn weight(&self, resources: &crate::core::common::Resources) -> f64 {
        resources.cpu + resources.memory_bytes as f64 / crate::core::common::MIB as f64
    }
}

/// Selects the owned node with the lowest weighted allocation, preferring
/// empty nodes and tie-breaking lexicographically on node name (spec
/// §4.2 "Victim selection for DESTROY").
pub fn select_victim(
    owned_nodes: &[OwnedNode],
    allocations: &AllocatedResources,
    metric: &dyn VictimMetric,
) -> Option<String> {
    owned_nodes
        .iter()
        .map(|node| {
            let resources = allocations
                .get(&node.name)
                .copied()
                .unwrap_or_default();
            (node.name.clone(), metric.weight(&resources))
        })
        .min_by(|(name_a, weight_a), (name_b, weight_b)| {
            weight_a
                .total_cmp(weight_b)
                .then_with(|| name_a.cmp(name_b))
        })
        .map(|(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::common::Resources;

    fn host(id: &str, cpu: f64, mem_gib: f64, status: HostStatus) -> Host {
        Host {
            id: id.to_string(),
            cpu_free_cores: cpu,
            mem_free_bytes: (mem_gib * (1u64 << 30) as f64) as u64,
            status,
        }
    }

    // Scenario 7: three hosts with identical initial capacity, three CREATE
    // events -> one event each to host 01/02/03 in order.
    #[test]
    fn scenario_7_batch_spreads_across_identical_hosts() {
        let hosts = vec![
            host("host-01", 16.0, 64.0, HostStatus::Online),
            host("host-02", 16.0, 64.0, HostStatus::Online),
            host("host-03", 16.0, 64.0, HostStatus::Online),
        ];
        let mut batch = vec![
            ScaleEvent::create("n1", ""),
            ScaleEvent::create("n2", ""),
            ScaleEvent::create("n3", ""),
        ];
        place_batch(&mut batch, &hosts, 2.0, 2 * (1u64 << 30));

        let assigned: Vec<_> = batch.iter().map(|e| e.target_host.clone().unwrap()).collect();
        assert_eq!(assigned, vec!["host-01", "host-02", "host-03"]);
    }

    #[test]
    fn batch_subtracts_within_batch_so_events_do_not_collide() {
        // Only one host has room for two nodes, the rest are too small.
        let hosts = vec![
            host("big", 8.0, 8.0, HostStatus::Online),
            host("small", 1.0, 1.0, HostStatus::Online),
        ];
        let mut batch = vec![ScaleEvent::create("n1", ""), ScaleEvent::create("n2", "")];
        place_batch(&mut batch, &hosts, 2.0, 2 * (1u64 << 30));

        assert_eq!(batch[0].target_host.as_deref(), Some("big"));
        // after subtracting n1's footprint, "big" only has 6 cores/6GiB
        // left which still fits n2; "small" never qualifies.
        assert_eq!(batch[1].target_host.as_deref(), Some("big"));
    }

    #[test]
    fn offline_hosts_are_excluded() {
        let hosts = vec![host("offline", 99.0, 99.0, HostStatus::Offline)];
        let mut batch = vec![ScaleEvent::create("n1", "")];
        place_batch(&mut batch, &hosts, 2.0, 2 * (1u64 << 30));
        assert!(batch[0].target_host.is_none());
    }

    #[test]
    fn event_deferred_when_no_host_fits() {
        let hosts = vec![host("tiny", 1.0, 1.0, HostStatus::Online)];
        let mut batch = vec![ScaleEvent::create("n1", "")];
        place_batch(&mut batch, &hosts, 4.0, 4 * (1u64 << 30));
        assert!(batch[0].target_host.is_none());
    }

    // Scenario 6: allocations {A:(1,2048), B:(1,2048), C:(1,1048)}, config
    // {cores:2, mem:1024} -> victim = C (lowest weighted allocation).
    #[test]
    fn scenario_6_victim_is_lowest_weighted_allocation() {
        let nodes = vec![
            OwnedNode::new("A"),
            OwnedNode::new("B"),
            OwnedNode::new("C"),
        ];
        let mib = 1u64 << 20;
        let allocations: AllocatedResources = [
            ("A".to_string(), Resources::new(1.0, 2048 * mib)),
            ("B".to_string(), Resources::new(1.0, 2048 * mib)),
            ("C".to_string(), Resources::new(1.0, 1048 * mib)),
        ]
        .into_iter()
        .collect();

        let victim = select_victim(&nodes, &allocations, &DefaultVictimMetric);
        assert_eq!(victim.as_deref(), Some("C"));
    }

    #[test]
    fn empty_nodes_are_always_preferred() {
        let nodes = vec![OwnedNode::new("busy"), OwnedNode::new("idle")];
        let allocations: AllocatedResources =
            [("busy".to_string(), Resources::new(0.01, 1))].into_iter().collect();
        let victim = select_victim(&nodes, &allocations, &DefaultVictimMetric);
        assert_eq!(victim.as_deref(), Some("idle"));
    }

    #[test]
    fn ties_break_lexicographically_on_name() {
        let nodes = vec![OwnedNode::new("zzz"), OwnedNode::new("aaa")];
        let allocations = AllocatedResources::new();
        let victim = select_victim(&nodes, &allocations, &DefaultVictimMetric);
        assert_eq!(victim.as_deref(), Some("aaa"));
    }
}
