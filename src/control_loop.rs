//! Control loop (spec §4.5, C7): the tick that ties accounting, placement,
//! and the work queue together. Runs on its own cadence (`config.poll_interval`)
//! independent of the pipeline workers consuming the events it publishes.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};
use regex::Regex;
use tokio::sync::watch;

use crate::accounting::{assess_scale_down, required_create_events};
use crate::clients::cluster::ClusterClient;
use crate::clients::hypervisor::HypervisorClient;
use crate::config::Config;
use crate::core::scale_event::ScaleEventKind;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::placement::{place_batch, select_victim, DefaultVictimMetric};
use crate::queue::WorkQueue;

pub struct ControlLoop {
    hypervisor: Arc<dyn HypervisorClient>,
    cluster: Arc<dyn ClusterClient>,
    queue: Arc<dyn WorkQueue>,
    config: Arc<Config>,
    owned_pattern: Regex,
    metrics: Arc<Metrics>,
    tick_count: u64,
    dry_run: bool,
}

impl ControlLoop {
    pub fn new(
        hypervisor: Arc<dyn HypervisorClient>,
        cluster: Arc<dyn ClusterClient>,
        queue: Arc<dyn WorkQueue>,
        config: Arc<Config>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self::with_dry_run(hypervisor, cluster, queue, config, metrics, false)
    }

    /// Same as [`ControlLoop::new`], but when `dry_run` is set, computed
    /// events are logged and counted without being published — useful for
    /// observing scaling decisions read-only during rollout (spec §4.7).
    pub fn with_dry_run(
        hypervisor: Arc<dyn HypervisorClient>,
        cluster: Arc<dyn ClusterClient>,
        queue: Arc<dyn WorkQueue>,
        config: Arc<Config>,
        metrics: Arc<Metrics>,
        dry_run: bool,
    ) -> Self {
        let owned_pattern = crate::core::common::owned_name_regex(&config.node_name_prefix);
        Self {
            hypervisor,
            cluster,
            queue,
            config,
            owned_pattern,
            metrics,
            tick_count: 0,
            dry_run,
        }
    }

    /// Runs ticks on `config.poll_interval` until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!("control loop tick failed: {err}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("control loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Executes one tick end to end (spec §4.5 steps 1-5).
    pub async fn tick(&mut self) -> Result<()> {
        self.tick_count += 1;
        self.metrics.ticks.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        // Step 1: taint-blocked guard.
        if self.cluster.is_taint_blocked().await? {
            debug!("tick {}: unschedulable demand is taint-blocked, skipping", self.tick_count);
            self.metrics
                .ticks_skipped_taint_blocked
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Ok(());
        }

        // Step 2: snapshot.
        let owned_nodes = self.cluster.list_owned_nodes(&self.owned_pattern).await?;
        let allocations = self.cluster.list_allocations(&owned_nodes).await?;
        let demand = self.cluster.list_unschedulable_demand().await?;
        let create_depth = self.queue.depth(ScaleEventKind::Create).await?;
        let destroy_depth = self.queue.depth(ScaleEventKind::Destroy).await?;

        // Step 3: scale up.
        if !demand.is_zero() {
            let mut batch = required_create_events(
                demand,
                create_depth.total(),
                owned_nodes.len() as u64,
                &self.config,
            );
            if !batch.is_empty() {
                let hosts = self.hypervisor.list_hosts().await?;
                place_batch(&mut batch, &hosts, self.config.node_cores, self.config.node_memory_mib * crate::core::common::MIB);

                for event in batch {
                    if event.target_host.is_some() {
                        if self.dry_run {
                            info!("dry-run: would publish CREATE {}", event.node_name);
                        } else {
                            self.queue.publish(event).await?;
                        }
                        self.metrics
                            .scale_up_events_published
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    } else {
                        debug!("tick {}: deferring {} (no host fits)", self.tick_count, event.node_name);
                        self.metrics
                            .scale_up_events_deferred
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                }
            }
            return Ok(());
        }

        // Step 4: scale down, only when nothing is growing the cluster right now.
        if create_depth.total() == 0 {
            if let Some(mut event) = assess_scale_down(&allocations, owned_nodes.len() as u64, &self.config) {
                if let Some(victim) = select_victim(&owned_nodes, &allocations, &DefaultVictimMetric) {
                    event.id = victim.clone();
                    event.node_name = victim;
                    if self.dry_run {
                        info!("dry-run: would publish DESTROY {}", event.node_name);
                    } else {
                        self.queue.publish(event).await?;
                    }
                    self.metrics
                        .scale_down_events_published
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
        }

        // Step 5: orphan reconciliation, every N ticks and only when the
        // queue is quiescent — with any CREATE/DESTROY in flight, the
        // cluster-vs-hypervisor views are not known-consistent and a
        // reconciliation pass could delete something that's mid-flight.
        if self.tick_count % self.config.orphan_reconcile_every_n_ticks == 0 {
            if self.dry_run {
                debug!("dry-run: skipping orphan reconciliation");
            } else if create_depth.total() == 0 && destroy_depth.total() == 0 {
                self.reconcile_orphans().await?;
            } else {
                debug!(
                    "tick {}: skipping orphan reconciliation, {} create / {} destroy inflight",
                    self.tick_count,
                    create_depth.total(),
                    destroy_depth.total()
                );
                self.metrics
                    .orphan_reconciliation_skipped_inflight
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }

        Ok(())
    }

    /// Deletes orphaned VMs (no matching cluster node) and orphaned nodes
    /// (no matching VM) among owned resources (spec §4.5 step 5).
    async fn reconcile_orphans(&self) -> Result<()> {
        let vm_names: HashSet<String> = self
            .hypervisor
            .list_owned_vms(&self.owned_pattern)
            .await?
            .into_iter()
            .collect();
        let owned_nodes = self.cluster.list_owned_nodes(&self.owned_pattern).await?;
        let node_names: HashSet<String> = owned_nodes.iter().map(|n| n.name.clone()).collect();

        for name in vm_names.difference(&node_names) {
            warn!("reconcile: {name} has a VM but no cluster node, destroying VM");
            if let Some(vm) = self.hypervisor.get_vm_by_name(name).await? {
                let _ = self.hypervisor.stop(&vm).await;
                self.hypervisor.destroy(&vm).await?;
                self.metrics
                    .orphans_reconciled
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }

        for name in node_names.difference(&vm_names) {
            warn!("reconcile: {name} has a cluster node but no VM, deleting node");
            self.cluster.delete_node(name).await?;
            self.metrics
                .orphans_reconciled
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fakes::{FakeCluster, FakeHypervisor};
    use crate::queue::in_memory::InMemoryWorkQueue;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            node_cores: 2.0,
            node_memory_mib: 2048,
            max_nodes: 10,
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

    #[tokio::test]
    async fn tick_publishes_create_event_when_demand_is_unmet() {
        let config = Arc::new(test_config());
        let hypervisor = Arc::new(FakeHypervisor::with_one_large_host());
        let cluster = Arc::new(FakeCluster::with_demand(1.0, 0));
        let queue = Arc::new(InMemoryWorkQueue::new(100));
        let metrics = Arc::new(Metrics::new());

        let mut loop_ = ControlLoop::new(hypervisor, cluster, queue.clone(), config, metrics.clone());
        loop_.tick().await.unwrap();

        assert_eq!(queue.depth(ScaleEventKind::Create).await.unwrap().total(), 1);
        assert_eq!(
            metrics.scale_up_events_published.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn tick_skips_everything_when_taint_blocked() {
        let config = Arc::new(test_config());
        let hypervisor = Arc::new(FakeHypervisor::with_one_large_host());
        let mut cluster = FakeCluster::with_demand(1.0, 0);
        cluster.taint_blocked = true;
        let cluster = Arc::new(cluster);
        let queue = Arc::new(InMemoryWorkQueue::new(100));
        let metrics = Arc::new(Metrics::new());

        let mut loop_ = ControlLoop::new(hypervisor, cluster, queue.clone(), config, metrics.clone());
        loop_.tick().await.unwrap();

        assert_eq!(queue.depth(ScaleEventKind::Create).await.unwrap().total(), 0);
        assert_eq!(
            metrics.ticks_skipped_taint_blocked.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn tick_does_not_scale_down_while_create_is_inflight() {
        let config = Arc::new(test_config());
        let hypervisor = Arc::new(FakeHypervisor::with_one_large_host());
        let cluster = Arc::new(FakeCluster::idle_with_nodes(vec!["worker-a".into()]));
        let queue = Arc::new(InMemoryWorkQueue::new(100));
        queue
            .publish(crate::core::scale_event::ScaleEvent::create("worker-b", "host-1"))
            .await
            .unwrap();
        let metrics = Arc::new(Metrics::new());

        let mut loop_ = ControlLoop::new(hypervisor, cluster, queue.clone(), config, metrics);
        loop_.tick().await.unwrap();

        assert_eq!(queue.depth(ScaleEventKind::Destroy).await.unwrap().total(), 0);
    }
}
