use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;

use crate::clients::cluster::ClusterClient;
use crate::clients::hypervisor::{CloudInit, Host, HostStatus, HypervisorClient, VmRef, VmStatus};
use crate::core::common::Resources;
use crate::core::demand::UnschedulableDemand;
use crate::core::node::OwnedNode;
use crate::error::Result;

/// In-memory hypervisor double. Tracks hosts and cloned VMs so pipeline and
/// control-loop tests can drive a full CREATE/DESTROY cycle without a real
/// transport.
pub struct FakeHypervisor {
    hosts: Mutex<Vec<Host>>,
    vms: Mutex<BTreeMap<String, (VmRef, VmStatus)>>,
}

impl FakeHypervisor {
    pub fn new(hosts: Vec<Host>) -> Self {
        Self {
            hosts: Mutex::new(hosts),
            vms: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_one_large_host() -> Self {
        Self::new(vec![Host {
            id: "host-1".into(),
            cpu_free_cores: 64.0,
            mem_free_bytes: 64 * (1u64 << 30),
            status: HostStatus::Online,
        }])
    }
}

#[async_trait]
impl HypervisorClient for FakeHypervisor {
    async fn list_hosts(&self) -> Result<Vec<Host>> {
        Ok(self.hosts.lock().unwrap().clone())
    }

    async fn clone_template(
        &self,
        _template_ref: &str,
        name: &str,
        _target_host: &str,
        _cloud_init: &CloudInit,
    ) -> Result<VmRef> {
        let vm = VmRef(name.to_string());
        self.vms
            .lock()
            .unwrap()
            .insert(name.to_string(), (vm.clone(), VmStatus::Pending));
        Ok(vm)
    }

    async fn start(&self, vm: &VmRef) -> Result<()> {
        if let Some(entry) = self.vms.lock().unwrap().get_mut(&vm.0) {
            entry.1 = VmStatus::Running;
        }
        Ok(())
    }

    async fn stop(&self, vm: &VmRef) -> Result<()> {
        if let Some(entry) = self.vms.lock().unwrap().get_mut(&vm.0) {
            entry.1 = VmStatus::Stopped;
        }
        Ok(())
    }

    async fn destroy(&self, vm: &VmRef) -> Result<()> {
        self.vms.lock().unwrap().remove(&vm.0);
        Ok(())
    }

    async fn vm_status(&self, vm: &VmRef) -> Result<VmStatus> {
        Ok(self
            .vms
            .lock()
            .unwrap()
            .get(&vm.0)
            .map(|(_, status)| *status)
            .unwrap_or(VmStatus::Stopped))
    }

    async fn get_vm_by_name(&self, name: &str) -> Result<Option<VmRef>> {
        Ok(self.vms.lock().unwrap().get(name).map(|(vm, _)| vm.clone()))
    }

    async fn list_owned_vms(&self, pattern: &regex::Regex) -> Result<Vec<String>> {
        Ok(self
            .vms
            .lock()
            .unwrap()
            .keys()
            .filter(|name| pattern.is_match(name))
            .cloned()
            .collect())
    }
}

/// In-memory cluster double, preloaded with a fixed demand/allocation view.
pub struct FakeCluster {
    pub demand: UnschedulableDemand,
    pub taint_blocked: bool,
    pub owned_nodes: Vec<OwnedNode>,
    pub allocations: BTreeMap<String, Resources>,
}

impl FakeCluster {
    pub fn with_demand(cpu: f64, memory_bytes: u64) -> Self {
        Self {
            demand: UnschedulableDemand { cpu, memory_bytes },
            taint_blocked: false,
            owned_nodes: Vec::new(),
            allocations: BTreeMap::new(),
        }
    }

    pub fn idle_with_nodes(names: Vec<String>) -> Self {
        let owned_nodes = names
            .into_iter()
            .map(|name| OwnedNode { name, ready: true })
            .collect();
        Self {
            demand: UnschedulableDemand::default(),
            taint_blocked: false,
            owned_nodes,
            allocations: BTreeMap::new(),
        }
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_unschedulable_demand(&self) -> Result<UnschedulableDemand> {
        Ok(self.demand)
    }

    async fn is_taint_blocked(&self) -> Result<bool> {
        Ok(self.taint_blocked)
    }

    async fn list_owned_nodes(&self, pattern: &regex::Regex) -> Result<Vec<OwnedNode>> {
        Ok(self
            .owned_nodes
            .iter()
            .filter(|n| pattern.is_match(&n.name))
            .cloned()
            .collect())
    }

    async fn list_allocations(&self, nodes: &[OwnedNode]) -> Result<BTreeMap<String, Resources>> {
        Ok(nodes
            .iter()
            .filter_map(|n| {
                self.allocations
                    .get(&n.name)
                    .map(|r| (n.name.clone(), *r))
            })
            .collect())
    }

    async fn list_empty_nodes(&self, pattern: &regex::Regex) -> Result<Vec<OwnedNode>> {
        Ok(self
            .owned_nodes
            .iter()
            .filter(|n| pattern.is_match(&n.name) && !self.allocations.contains_key(&n.name))
            .cloned()
            .collect())
    }

    async fn await_ready(&self, _name: &str, _deadline: Instant) -> Result<bool> {
        Ok(true)
    }

    async fn cordon(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn evict_all_pods(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_node(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}
