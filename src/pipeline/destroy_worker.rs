//! DESTROY state machine (spec §4.4):
//! `RECEIVED -> CORDONING -> EVICTING -> DELETING_NODE -> STOPPING_VM ->
//! REMOVING_VM -> DONE (ack)`

use std::sync::Arc;

use log::{debug, info, warn};
use regex::Regex;
use tokio::sync::watch;

use crate::clients::cluster::ClusterClient;
use crate::clients::hypervisor::HypervisorClient;
use crate::core::scale_event::ScaleEvent;
use crate::core::scale_event::ScaleEventKind;
use crate::error::{Result, ScalerError};
use crate::metrics::Metrics;
use crate::pipeline::{outcome_for_error, Outcome};
use crate::queue::WorkQueue;

pub async fn run_destroy_workers(
    queue: Arc<dyn WorkQueue>,
    hypervisor: Arc<dyn HypervisorClient>,
    cluster: Arc<dyn ClusterClient>,
    owned_pattern: Regex,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
    concurrency: usize,
) {
    let mut handles = Vec::with_capacity(concurrency);
    for worker_id in 0..concurrency {
        let queue = queue.clone();
        let hypervisor = hypervisor.clone();
        let cluster = cluster.clone();
        let owned_pattern = owned_pattern.clone();
        let metrics = metrics.clone();
        let mut shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let delivery = tokio::select! {
                    delivery = queue.consume(ScaleEventKind::Destroy) => delivery,
                    _ = shutdown.changed() => break,
                };
                let (event, ack) = match delivery {
                    Ok(Some(pair)) => pair,
                    Ok(None) => break,
                    Err(err) => {
                        warn!("destroy-worker-{worker_id}: consume failed: {err}");
                        continue;
                    }
                };

                match handle_destroy_event(&event, &*hypervisor, &*cluster, &owned_pattern).await
                {
                    Ok(()) => {
                        info!("destroy-worker-{worker_id}: {} removed", event.node_name);
                        if let Err(err) = ack.ack().await {
                            warn!("destroy-worker-{worker_id}: ack failed: {err}");
                        }
                    }
                    Err(err) => {
                        metrics
                            .destroy_worker_failures
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        let outcome = outcome_for_error(&err);
                        warn!(
                            "destroy-worker-{worker_id}: {} failed ({err}), outcome {outcome:?}",
                            event.node_name
                        );
                        let requeue = outcome == Outcome::NackRequeue;
                        if let Err(nack_err) = ack.nack(requeue).await {
                            warn!("destroy-worker-{worker_id}: nack failed: {nack_err}");
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

/// Executes one DESTROY event end to end. Refuses to act on a node whose
/// name does not match the owned pattern (spec invariant 4, "owned-only
/// deletion") — this is an [`ScalerError::Invariant`], never retried.
pub async fn handle_destroy_event(
    event: &ScaleEvent,
    hypervisor: &dyn HypervisorClient,
    cluster: &dyn ClusterClient,
    owned_pattern: &Regex,
) -> Result<()> {
    if !owned_pattern.is_match(&event.node_name) {
        return Err(ScalerError::Invariant(format!(
            "refusing to destroy non-owned node {}",
            event.node_name
        )));
    }

    debug!("CORDONING {}", event.node_name);
    // Cordoning is idempotent: a node already cordoned, or already gone, is
    // not a failure.
    if let Err(err) = cluster.cordon(&event.node_name).await {
        if !matches!(err, ScalerError::RemoteState(_)) {
            return Err(err);
        }
    }

    debug!("EVICTING {}", event.node_name);
    cluster.evict_all_pods(&event.node_name).await?;

    debug!("DELETING_NODE {}", event.node_name);
    if let Err(err) = cluster.delete_node(&event.node_name).await {
        if !matches!(err, ScalerError::RemoteState(_)) {
            return Err(err);
        }
    }

    let vm = hypervisor.get_vm_by_name(&event.node_name).await?;
    let Some(vm) = vm else {
        // No backing VM: either already removed by a prior attempt, or the
        // node never had one. Either way there is nothing left to do.
        return Ok(());
    };

    debug!("STOPPING_VM {}", event.node_name);
    hypervisor.stop(&vm).await?;

    debug!("REMOVING_VM {}", event.node_name);
    hypervisor.destroy(&vm).await?;

    Ok(())
}
