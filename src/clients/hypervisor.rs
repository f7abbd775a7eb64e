//! Hypervisor client contract (spec §6, C1). The concrete transport is out
//! of scope for this crate; callers inject any implementation of
//! [`HypervisorClient`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Whether a hypervisor host is eligible for placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostStatus {
    Online,
    Offline,
    Unknown,
}

/// A hypervisor host and its currently free capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub cpu_free_cores: f64,
    pub mem_free_bytes: u64,
    pub status: HostStatus,
}

/// Opaque reference to a VM on the hypervisor, returned by `clone_template`
/// and consumed by `start`/`stop`/`destroy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRef(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    Running,
    Stopped,
    Pending,
}

/// Cloud-init payload handed to a freshly cloned VM.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudInit {
    pub ssh_key: String,
    pub join_token: String,
}

#[async_trait]
pub trait HypervisorClient: Send + Sync {
    async fn list_hosts(&self) -> Result<Vec<Host>>;

    async fn clone_template(
        &self,
        template_ref: &str,
        name: &str,
        target_host: &str,
        cloud_init: &CloudInit,
    ) -> Result<VmRef>;

    async fn start(&self, vm: &VmRef) -> Result<()>;

    async fn stop(&self, vm: &VmRef) -> Result<()>;

    async fn destroy(&self, vm: &VmRef) -> Result<()>;

    async fn vm_status(&self, vm: &VmRef) -> Result<VmStatus>;

    async fn get_vm_by_name(&self, name: &str) -> Result<Option<VmRef>>;

    async fn list_owned_vms(&self, pattern: &regex::Regex) -> Result<Vec<String>>;
}
