//! Reference REST transport for [`HypervisorClient`] (spec §6, C1). The
//! wire format here is this crate's own convention, not a vendor API —
//! operators pointing at a real hypervisor fleet are expected to provide
//! their own implementation of the trait instead.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::clients::hypervisor::{CloudInit, Host, HypervisorClient, VmRef, VmStatus};
use crate::config::Config;
use crate::error::{Result, ScalerError};

pub struct HttpHypervisorClient {
    http: Client,
    base_url: String,
    token: String,
}

impl HttpHypervisorClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(config.hypervisor_insecure)
            .timeout(crate::config::DEFAULT_CALL_TIMEOUT)
            .build()
            .map_err(|e| ScalerError::Config(format!("hypervisor http client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.hypervisor_url.trim_end_matches('/').to_string(),
            token: config.hypervisor_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ScalerError::Transport(format!("hypervisor request: {e}")))?;
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::CONFLICT | StatusCode::NOT_FOUND => Err(ScalerError::RemoteState(format!(
                "hypervisor returned {}",
                response.status()
            ))),
            status if status.is_server_error() => Err(ScalerError::Transport(format!(
                "hypervisor returned {status}"
            ))),
            status => Err(ScalerError::Transport(format!(
                "hypervisor returned unexpected status {status}"
            ))),
        }
    }
}

#[derive(Deserialize)]
struct HostDto {
    id: String,
    cpu_free_cores: f64,
    mem_free_bytes: u64,
    status: String,
}

#[derive(Serialize)]
struct CloneRequest<'a> {
    template_ref: &'a str,
    name: &'a str,
    target_host: &'a str,
    ssh_key: &'a str,
    join_token: &'a str,
}

#[derive(Deserialize)]
struct VmDto {
    id: String,
    status: String,
}

#[async_trait]
impl HypervisorClient for HttpHypervisorClient {
    async fn list_hosts(&self) -> Result<Vec<Host>> {
        let response = self.send(self.http.get(self.url("/hosts"))).await?;
        let hosts: Vec<HostDto> = response
            .json()
            .await
            .map_err(|e| ScalerError::RemoteState(format!("malformed host list: {e}")))?;
        Ok(hosts
            .into_iter()
            .map(|h| Host {
                id: h.id,
                cpu_free_cores: h.cpu_free_cores,
                mem_free_bytes: h.mem_free_bytes,
                status: match h.status.as_str() {
                    "online" => crate::clients::hypervisor::HostStatus::Online,
                    "offline" => crate::clients::hypervisor::HostStatus::Offline,
                    _ => crate::clients::hypervisor::HostStatus::Unknown,
                },
            })
            .collect())
    }

    async fn clone_template(
        &self,
        template_ref: &str,
        name: &str,
        target_host: &str,
        cloud_init: &CloudInit,
    ) -> Result<VmRef> {
        let response = self
            .send(self.http.post(self.url("/vms")).json(&CloneRequest {
                template_ref,
                name,
                target_host,
                ssh_key: &cloud_init.ssh_key,
                join_token: &cloud_init.join_token,
            }))
            .await?;
        let vm: VmDto = response
            .json()
            .await
            .map_err(|e| ScalerError::RemoteState(format!("malformed clone response: {e}")))?;
        Ok(VmRef(vm.id))
    }

    async fn start(&self, vm: &VmRef) -> Result<()> {
        self.send(self.http.post(self.url(&format!("/vms/{}/start", vm.0))))
            .await?;
        Ok(())
    }

    async fn stop(&self, vm: &VmRef) -> Result<()> {
        self.send(self.http.post(self.url(&format!("/vms/{}/stop", vm.0))))
            .await?;
        Ok(())
    }

    async fn destroy(&self, vm: &VmRef) -> Result<()> {
        self.send(self.http.delete(self.url(&format!("/vms/{}", vm.0))))
            .await?;
        Ok(())
    }

    async fn vm_status(&self, vm: &VmRef) -> Result<VmStatus> {
        let response = self
            .send(self.http.get(self.url(&format!("/vms/{}", vm.0))))
            .await?;
        let dto: VmDto = response
            .json()
            .await
            .map_err(|e| ScalerError::RemoteState(format!("malformed vm status: {e}")))?;
        Ok(match dto.status.as_str() {
            "running" => VmStatus::Running,
            "stopped" => VmStatus::Stopped,
            _ => VmStatus::Pending,
        })
    }

    async fn get_vm_by_name(&self, name: &str) -> Result<Option<VmRef>> {
        let response = self
            .http
            .get(self.url(&format!("/vms/by-name/{name}")))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ScalerError::Transport(format!("hypervisor request: {e}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let dto: VmDto = response
            .json()
            .await
            .map_err(|e| ScalerError::RemoteState(format!("malformed vm lookup: {e}")))?;
        Ok(Some(VmRef(dto.id)))
    }

    async fn list_owned_vms(&self, pattern: &regex::Regex) -> Result<Vec<String>> {
        let response = self.send(self.http.get(self.url("/vms"))).await?;
        let vms: Vec<VmDto> = response
            .json()
            .await
            .map_err(|e| ScalerError::RemoteState(format!("malformed vm list: {e}")))?;
        Ok(vms
            .into_iter()
            .map(|v| v.id)
            .filter(|id| pattern.is_match(id))
            .collect())
    }
}
