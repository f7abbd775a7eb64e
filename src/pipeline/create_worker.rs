//! CREATE state machine (spec §4.4):
//! `RECEIVED -> CLONING -> STARTING -> AWAITING_JOIN -> READY (ack)`

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::watch;

use crate::clients::cluster::ClusterClient;
use crate::clients::hypervisor::{CloudInit, HypervisorClient, VmStatus};
use crate::config::Config;
use crate::core::scale_event::{ScaleEvent, ScaleEventKind};
use crate::error::{Result, ScalerError};
use crate::metrics::Metrics;
use crate::pipeline::{outcome_for_error, Outcome};
use crate::queue::WorkQueue;

/// Runs `concurrency` parallel consumers against the CREATE channel until
/// `shutdown` fires. Each consumer finishes its current event (up to its
/// deadline) before observing shutdown, matching spec §5's cancellation
/// rule.
pub async fn run_create_workers(
    queue: Arc<dyn WorkQueue>,
    hypervisor: Arc<dyn HypervisorClient>,
    cluster: Arc<dyn ClusterClient>,
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
    concurrency: usize,
) {
    let mut handles = Vec::with_capacity(concurrency);
    for worker_id in 0..concurrency {
        let queue = queue.clone();
        let hypervisor = hypervisor.clone();
        let cluster = cluster.clone();
        let config = config.clone();
        let metrics = metrics.clone();
        let mut shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let delivery = tokio::select! {
                    delivery = queue.consume(ScaleEventKind::Create) => delivery,
                    _ = shutdown.changed() => break,
                };
                let (event, ack) = match delivery {
                    Ok(Some(pair)) => pair,
                    Ok(None) => break,
                    Err(err) => {
                        warn!("create-worker-{worker_id}: consume failed: {err}");
                        continue;
                    }
                };

                match handle_create_event(&event, &*hypervisor, &*cluster, &config).await {
                    Ok(()) => {
                        info!("create-worker-{worker_id}: {} ready", event.node_name);
                        if let Err(err) = ack.ack().await {
                            warn!("create-worker-{worker_id}: ack failed: {err}");
                        }
                    }
                    Err(err) => {
                        metrics
                            .create_worker_failures
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        let outcome = outcome_for_error(&err);
                        warn!(
                            "create-worker-{worker_id}: {} failed ({err}), outcome {outcome:?}",
                            event.node_name
                        );
                        let requeue = outcome == Outcome::NackRequeue;
                        if let Err(nack_err) = ack.nack(requeue).await {
                            warn!("create-worker-{worker_id}: nack failed: {nack_err}");
                        }
                    }
                }
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

/// Executes one CREATE event end to end. On any failure beyond CLONING
/// that leaves a partial VM, the VM is torn down before returning the
/// error, so a dropped event never leaks hypervisor state.
pub async fn handle_create_event(
    event: &ScaleEvent,
    hypervisor: &dyn HypervisorClient,
    cluster: &dyn ClusterClient,
    config: &Config,
) -> Result<()> {
    let target_host = event.target_host.as_deref().ok_or_else(|| {
        ScalerError::Invariant(format!(
            "CREATE event {} has no target_host assigned by placement",
            event.node_name
        ))
    })?;

    debug!("CLONING {} on {}", event.node_name, target_host);
    let vm = match hypervisor
        .clone_template(
            &config.template_ref,
            &event.node_name,
            target_host,
            &CloudInit {
                ssh_key: config.ssh_key.clone(),
                join_token: String::new(),
            },
        )
        .await
    {
        Ok(vm) => vm,
        Err(ScalerError::RemoteState(_)) => {
            // Name collision: probe for crash-recovery idempotence. If an
            // owned VM with this name is already running, skip straight to
            // AWAITING_JOIN; otherwise this is a genuine failure.
            match hypervisor.get_vm_by_name(&event.node_name).await? {
                Some(existing) if hypervisor.vm_status(&existing).await? == VmStatus::Running => {
                    return await_join(&event.node_name, existing, hypervisor, cluster, config)
                        .await;
                }
                _ => {
                    return Err(ScalerError::RemoteState(format!(
                        "name collision for {} with no running owned VM",
                        event.node_name
                    )))
                }
            }
        }
        Err(err) => return Err(err),
    };

    debug!("STARTING {}", event.node_name);
    if let Err(err) = hypervisor.start(&vm).await {
        let _ = hypervisor.destroy(&vm).await;
        return Err(err);
    }
    await_running(&event.node_name, &vm, hypervisor).await?;

    await_join(&event.node_name, vm, hypervisor, cluster, config).await
}

/// Polls `vm_status` until it reports [`VmStatus::Running`] or
/// `DEFAULT_CALL_TIMEOUT` elapses (spec §4.4 STARTING: "issue VM start. Poll
/// status until running or timeout"). Tears down the VM on timeout or error,
/// same as a failed join-wait.
async fn await_running(
    node_name: &str,
    vm: &crate::clients::hypervisor::VmRef,
    hypervisor: &dyn HypervisorClient,
) -> Result<()> {
    let deadline = Instant::now() + crate::config::DEFAULT_CALL_TIMEOUT;
    loop {
        match hypervisor.vm_status(vm).await {
            Ok(VmStatus::Running) => return Ok(()),
            Ok(_) => {}
            Err(err) => {
                let _ = hypervisor.stop(vm).await;
                let _ = hypervisor.destroy(vm).await;
                return Err(err);
            }
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!("{node_name} did not report Running within the VM-start wait, tearing down");
            let _ = hypervisor.stop(vm).await;
            let _ = hypervisor.destroy(vm).await;
            return Err(ScalerError::Timeout(format!(
                "{node_name} did not start before deadline"
            )));
        }
        tokio::time::sleep(std::time::Duration::from_millis(200).min(remaining)).await;
    }
}

async fn await_join(
    node_name: &str,
    vm: crate::clients::hypervisor::VmRef,
    hypervisor: &dyn HypervisorClient,
    cluster: &dyn ClusterClient,
    config: &Config,
) -> Result<()> {
    debug!("AWAITING_JOIN {node_name}");
    let deadline = Instant::now() + config.wait_join;
    match cluster.await_ready(node_name, deadline).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            warn!("{node_name} did not join within wait_join_s, tearing down");
            let _ = hypervisor.stop(&vm).await;
            let _ = hypervisor.destroy(&vm).await;
            Err(ScalerError::Timeout(format!(
                "{node_name} did not become Ready before deadline"
            )))
        }
        Err(err) => {
            let _ = hypervisor.stop(&vm).await;
            let _ = hypervisor.destroy(&vm).await;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scale_event::ScaleEvent;
    use crate::testing::fakes::{FakeCluster, FakeHypervisor};
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
    async fn create_event_without_target_host_is_an_invariant_violation() {
        let hypervisor = FakeHypervisor::with_one_large_host();
        let cluster = FakeCluster::with_demand(0.0, 0);
        let config = test_config();
        let mut event = ScaleEvent::create("worker-1", "host-1");
        event.target_host = None;

        let err = handle_create_event(&event, &hypervisor, &cluster, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ScalerError::Invariant(_)));
    }

    #[tokio::test]
    async fn happy_path_clones_starts_and_awaits_join() {
        let hypervisor = FakeHypervisor::with_one_large_host();
        let cluster = FakeCluster::with_demand(0.0, 0); // await_ready fake always returns true
        let config = test_config();
        let event = ScaleEvent::create("worker-1", "host-1");

        handle_create_event(&event, &hypervisor, &cluster, &config)
            .await
            .unwrap();

        let vm = hypervisor.get_vm_by_name("worker-1").await.unwrap();
        assert!(vm.is_some(), "successful CREATE should leave a running VM behind");
    }
}
