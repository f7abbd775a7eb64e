//! Resource accounting (spec §4.1, C4): pure functions deciding the count
//! and direction of scale events. No I/O, no client, no queue — just data
//! in, `ScaleEvent`s out, so the seed scenarios in spec §8 can run as
//! plain unit tests.

use crate::config::Config;
use crate::core::common::{new_owned_name, Resources, MIB};
use crate::core::demand::{total_allocated, AllocatedResources, UnschedulableDemand};
use crate::core::scale_event::ScaleEvent;

/// Computes how many CREATE events are required to satisfy `demand`,
/// capped by `max_nodes` and net of events already in flight (spec §4.1
/// "Required-scale-up count").
///
/// Returns an empty vec when there is nothing to do, including when
/// `demand` is all-zero or when headroom to `max_nodes` is already
/// exhausted.
pub fn required_create_events(
    demand: UnschedulableDemand,
    inflight_create_count: u64,
    owned_count: u64,
    config: &Config,
) -> Vec<ScaleEvent> {
    if demand.is_zero() {
        return Vec::new();
    }

    let cpu_events = (demand.cpu / config.node_cores).ceil() as i64;
    let node_memory_bytes = config.node_memory_mib * MIB;
    let mem_events = (demand.memory_bytes as f64 / node_memory_bytes as f64).ceil() as i64;

    let required = cpu_events.max(mem_events).max(0);
    let net = required - inflight_create_count as i64;

    let remaining_headroom =
        config.max_nodes as i64 - owned_count as i64 - inflight_create_count as i64;
    let net = net.min(remaining_headroom).max(0);

    (0..net)
        .map(|_| {
            // target_host is assigned by placement (§4.2) once a batch is
            // formed; the event starts host-less.
            let mut event = ScaleEvent::create(new_owned_name(&config.node_name_prefix), "");
            event.target_host = None;
            event
        })
        .collect()
}

/// Whether scaling down by one node is acceptable for a single resource
/// dimension (spec §4.1 "Scale-down assessment"): never at literal zero
/// load, and never if surviving capacity would exceed `1 - headroom`
/// utilization.
fn acceptable_for_resource(total: f64, num_nodes: u64, node_capacity: f64, headroom: f64) -> bool {
    if total <= 0.0 {
        return false;
    }
    if num_nodes == 0 {
        return false;
    }
    let capacity_after_removal = (num_nodes - 1) as f64 * node_capacity;
    total <= capacity_after_removal * (1.0 - headroom)
}

/// Assesses whether scale-down is acceptable given current allocations
/// and node count, checking CPU and memory independently and requiring
/// both to hold (spec §4.1). Returns a host-less DESTROY event (victim
/// unassigned — placement fills that in, §4.2) when acceptable.
pub fn assess_scale_down(
    allocations: &AllocatedResources,
    num_nodes: u64,
    config: &Config,
) -> Option<ScaleEvent> {
    let Resources { cpu, memory_bytes } = total_allocated(allocations);

    let cpu_ok = acceptable_for_resource(cpu, num_nodes, config.node_cores, config.load_headroom);
    let mem_ok = acceptable_for_resource(
        memory_bytes as f64,
        num_nodes,
        (config.node_memory_mib * MIB) as f64,
        config.load_headroom,
    );

    if cpu_ok && mem_ok {
        // victim name filled in by placement::select_victim
        Some(ScaleEvent::destroy(""))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(node_cores: f64, node_memory_mib: u64, max_nodes: u64) -> Config {
        Config {
            node_cores,
            node_memory_mib,
            max_nodes,
            load_headroom: 0.2,
            poll_interval: Duration::from_secs(10),
            wait_join: Duration::from_secs(60),
            template_ref: "tmpl".into(),
            node_name_prefix: "worker".into(),
            ssh_key: "key".into(),
            hypervisor_url: "http://hv".into(),
            hypervisor_token: "tok".into(),
            hypervisor_insecure: false,
            cluster_api_url: "http://cluster".into(),
            cluster_api_token: "tok".into(),
            cluster_api_insecure: false,
            queue_host: "mq".into(),
            queue_port: 5672,
            queue_user: "guest".into(),
            queue_password: "guest".into(),
            orphan_reconcile_every_n_ticks: 10,
        }
    }

    fn demand(cpu: f64, mem_gib: f64) -> UnschedulableDemand {
        UnschedulableDemand {
            cpu,
            memory_bytes: (mem_gib * (1u64 << 30) as f64) as u64,
        }
    }

    // Scenario 1: demand {cpu: 1.0, mem: 0}, node_cores 2, max 3 -> 1 CREATE
    #[test]
    fn scenario_1_single_cpu_shortfall() {
        let config = test_config(2.0, 2048, 3);
        let events = required_create_events(demand(1.0, 0.0), 0, 0, &config);
        assert_eq!(events.len(), 1);
    }

    // Scenario 2: demand {cpu: 3.0, mem: 0} -> 2 CREATE
    #[test]
    fn scenario_2_larger_cpu_shortfall() {
        let config = test_config(2.0, 2048, 3);
        let events = required_create_events(demand(3.0, 0.0), 0, 0, &config);
        assert_eq!(events.len(), 2);
    }

    // Scenario 3: demand {cpu: 0, mem: 1 GiB}, node_mem 2048 MiB -> 1 CREATE
    #[test]
    fn scenario_3_single_memory_shortfall() {
        let config = test_config(2.0, 2048, 3);
        let events = required_create_events(demand(0.0, 1.0), 0, 0, &config);
        assert_eq!(events.len(), 1);
    }

    // Scenario 4: demand {cpu: 0, mem: 3 GiB} -> 2 CREATE
    #[test]
    fn scenario_4_larger_memory_shortfall() {
        let config = test_config(2.0, 2048, 3);
        let events = required_create_events(demand(0.0, 3.0), 0, 0, &config);
        assert_eq!(events.len(), 2);
    }

    // Scenario 5: demand {cpu: 1, mem: 3 GiB}, inflight 1 -> 1 CREATE
    #[test]
    fn scenario_5_nets_out_inflight() {
        let config = test_config(2.0, 2048, 3);
        let events = required_create_events(demand(1.0, 3.0), 1, 1, &config);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn zero_demand_yields_no_events() {
        let config = test_config(2.0, 2048, 3);
        let events = required_create_events(demand(0.0, 0.0), 0, 0, &config);
        assert!(events.is_empty());
    }

    #[test]
    fn capped_at_remaining_headroom_to_max_nodes() {
        let config = test_config(2.0, 2048, 3);
        // would need 5 nodes but only 3 max, 1 already owned, 0 inflight
        let events = required_create_events(demand(10.0, 0.0), 0, 1, &config);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn names_are_fresh_and_unique() {
        let config = test_config(2.0, 2048, 10);
        let events = required_create_events(demand(6.0, 0.0), 0, 0, &config);
        let names: std::collections::HashSet<_> =
            events.iter().map(|e| e.node_name.clone()).collect();
        assert_eq!(names.len(), events.len());
    }

    fn allocations(pairs: &[(&str, f64, u64)]) -> AllocatedResources {
        pairs
            .iter()
            .map(|(name, cpu, mem)| ((*name).to_string(), Resources::new(*cpu, *mem)))
            .collect()
    }

    // Scenario 8: 4 owned nodes at (2 cores, 2 GiB) + 1 empty, headroom 0.2 -> not acceptable
    #[test]
    fn scenario_8_scale_down_not_acceptable_when_utilization_too_high() {
        let config = test_config(2.0, 2048, 10);
        let gib = 1u64 << 30;
        let alloc = allocations(&[
            ("a", 2.0, 2 * gib),
            ("b", 2.0, 2 * gib),
            ("c", 2.0, 2 * gib),
            ("d", 2.0, 2 * gib),
            ("e", 0.0, 0),
        ]);
        assert!(assess_scale_down(&alloc, 5, &config).is_none());
    }

    // Scenario 9: 3 owned nodes each at (1 core, 500 MiB), config (2 cores,
    // 1024 MiB/node), headroom 0.2 -> acceptable. Surviving capacity after
    // removing one node is 2 nodes: 4 cores / 2048 MiB; at 80% that's 3.2
    // cores and 1638.4 MiB, both above the 3-core / 1500 MiB totals here.
    #[test]
    fn scenario_9_scale_down_acceptable_with_sufficient_headroom() {
        let config = test_config(2.0, 1024, 10);
        let mib = 1u64 << 20;
        let alloc = allocations(&[
            ("a", 1.0, 500 * mib),
            ("b", 1.0, 500 * mib),
            ("c", 1.0, 500 * mib),
        ]);
        assert!(assess_scale_down(&alloc, 3, &config).is_some());
    }

    // Scenario 10: all-zero allocations -> not acceptable (no flap to zero)
    #[test]
    fn scenario_10_scale_down_rejected_at_zero_load() {
        let config = test_config(2.0, 2048, 10);
        let alloc = allocations(&[("a", 0.0, 0), ("b", 0.0, 0)]);
        assert!(assess_scale_down(&alloc, 2, &config).is_none());
    }

    #[test]
    fn scale_down_requires_both_cpu_and_memory_to_be_acceptable() {
        let config = test_config(2.0, 1024, 10);
        let mib = 1u64 << 20;
        // CPU is comfortably low but memory alone blows past the threshold
        let alloc = allocations(&[
            ("a", 0.1, 4096 * mib),
            ("b", 0.1, 4096 * mib),
            ("c", 0.1, 4096 * mib),
        ]);
        assert!(assess_scale_down(&alloc, 3, &config).is_none());
    }
}
