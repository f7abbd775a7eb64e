//! Reference REST transport for [`ClusterClient`] (spec §6, C2). Same caveat
//! as [`crate::clients::http_hypervisor`]: this is this crate's own wire
//! convention, not a specific orchestrator's API.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::clients::cluster::ClusterClient;
use crate::config::Config;
use crate::core::common::Resources;
use crate::core::demand::UnschedulableDemand;
use crate::core::node::OwnedNode;
use crate::error::{Result, ScalerError};

pub struct HttpClusterClient {
    http: Client,
    base_url: String,
    token: String,
}

impl HttpClusterClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(config.cluster_api_insecure)
            .timeout(crate::config::DEFAULT_CALL_TIMEOUT)
            .build()
            .map_err(|e| ScalerError::Config(format!("cluster http client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.cluster_api_url.trim_end_matches('/').to_string(),
            token: config.cluster_api_token.clone(),
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
            .map_err(|e| ScalerError::Transport(format!("cluster request: {e}")))?;
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::CONFLICT | StatusCode::NOT_FOUND => Err(ScalerError::RemoteState(format!(
                "cluster api returned {}",
                response.status()
            ))),
            status if status.is_server_error() => {
                Err(ScalerError::Transport(format!("cluster api returned {status}")))
            }
            status => Err(ScalerError::Transport(format!(
                "cluster api returned unexpected status {status}"
            ))),
        }
    }
}

#[derive(Deserialize)]
struct DemandDto {
    cpu: f64,
    memory_bytes: u64,
}

#[derive(Deserialize)]
struct NodeDto {
    name: String,
    ready: bool,
}

#[derive(Deserialize)]
struct AllocationDto {
    name: String,
    cpu: f64,
    memory_bytes: u64,
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn list_unschedulable_demand(&self) -> Result<UnschedulableDemand> {
        let response = self
            .send(self.http.get(self.url("/unschedulable-demand")))
            .await?;
        let dto: DemandDto = response
            .json()
            .await
            .map_err(|e| ScalerError::RemoteState(format!("malformed demand: {e}")))?;
        Ok(UnschedulableDemand {
            cpu: dto.cpu,
            memory_bytes: dto.memory_bytes,
        })
    }

    async fn is_taint_blocked(&self) -> Result<bool> {
        let response = self.send(self.http.get(self.url("/taint-blocked"))).await?;
        #[derive(Deserialize)]
        struct Dto {
            blocked: bool,
        }
        let dto: Dto = response
            .json()
            .await
            .map_err(|e| ScalerError::RemoteState(format!("malformed taint status: {e}")))?;
        Ok(dto.blocked)
    }

    async fn list_owned_nodes(&self, pattern: &regex::Regex) -> Result<Vec<OwnedNode>> {
        let response = self.send(self.http.get(self.url("/nodes"))).await?;
        let nodes: Vec<NodeDto> = response
            .json()
            .await
            .map_err(|e| ScalerError::RemoteState(format!("malformed node list: {e}")))?;
        Ok(nodes
            .into_iter()
            .filter(|n| pattern.is_match(&n.name))
            .map(|n| OwnedNode {
                name: n.name,
                ready: n.ready,
            })
            .collect())
    }

    async fn list_allocations(&self, nodes: &[OwnedNode]) -> Result<BTreeMap<String, Resources>> {
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        let response = self
            .send(
                self.http
                    .post(self.url("/allocations"))
                    .json(&serde_json::json!({ "names": names })),
            )
            .await?;
        let rows: Vec<AllocationDto> = response
            .json()
            .await
            .map_err(|e| ScalerError::RemoteState(format!("malformed allocations: {e}")))?;
        Ok(rows
            .into_iter()
            .map(|r| (r.name, Resources::new(r.cpu, r.memory_bytes)))
            .collect())
    }

    async fn list_empty_nodes(&self, pattern: &regex::Regex) -> Result<Vec<OwnedNode>> {
        let nodes = self.list_owned_nodes(pattern).await?;
        let allocations = self.list_allocations(&nodes).await?;
        Ok(nodes
            .into_iter()
            .filter(|n| {
                allocations
                    .get(&n.name)
                    .map(|r| r.cpu <= 0.0 && r.memory_bytes == 0)
                    .unwrap_or(true)
            })
            .collect())
    }

    async fn await_ready(&self, name: &str, deadline: Instant) -> Result<bool> {
        // Polls rather than blocking server-side, matching spec §5's
        // bounded-poll resolution of the join-wait open question.
        loop {
            let response = self
                .send(self.http.get(self.url(&format!("/nodes/{name}"))))
                .await?;
            let dto: NodeDto = response
                .json()
                .await
                .map_err(|e| ScalerError::RemoteState(format!("malformed node status: {e}")))?;
            if dto.ready {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_secs(2).min(remaining)).await;
        }
    }

    async fn cordon(&self, name: &str) -> Result<()> {
        self.send(self.http.post(self.url(&format!("/nodes/{name}/cordon"))))
            .await?;
        Ok(())
    }

    async fn evict_all_pods(&self, name: &str) -> Result<()> {
        self.send(self.http.post(self.url(&format!("/nodes/{name}/evict"))))
            .await?;
        Ok(())
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        self.send(self.http.delete(self.url(&format!("/nodes/{name}"))))
            .await?;
        Ok(())
    }
}
