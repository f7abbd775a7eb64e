use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use tokio::sync::watch;

use vm_node_autoscaler::clients::http_cluster::HttpClusterClient;
use vm_node_autoscaler::clients::http_hypervisor::HttpHypervisorClient;
use vm_node_autoscaler::config::Config;
use vm_node_autoscaler::control_loop::ControlLoop;
use vm_node_autoscaler::metrics::{render, Metrics, OutputFormat};
use vm_node_autoscaler::pipeline::{create_worker, destroy_worker};
use vm_node_autoscaler::queue::amqp::AmqpWorkQueue;

/// VM node autoscaler: watches for unschedulable pods and scales a pool of
/// hypervisor-backed worker nodes up or down to match.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Overrides RUST_LOG when set (e.g. "debug", "info,vm_node_autoscaler=debug").
    #[arg(long)]
    log_level: Option<String>,

    /// Compute and log scale decisions without publishing events.
    #[arg(long)]
    dry_run: bool,

    /// Print metrics as JSON instead of a table on shutdown.
    #[arg(long)]
    json_metrics: bool,

    /// Number of concurrent CREATE/DESTROY pipeline workers per channel.
    #[arg(long, default_value_t = 4)]
    worker_concurrency: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Some(level) = &args.log_level {
        std::env::set_var("RUST_LOG", level);
    }
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let queue = match AmqpWorkQueue::connect(
        &config.queue_host,
        config.queue_port,
        &config.queue_user,
        &config.queue_password,
    )
    .await
    {
        Ok(queue) => Arc::new(queue) as Arc<dyn vm_node_autoscaler::queue::WorkQueue>,
        Err(err) => {
            error!("failed to connect to work queue: {err}");
            return ExitCode::FAILURE;
        }
    };

    let hypervisor = match HttpHypervisorClient::new(&config) {
        Ok(client) => {
            Arc::new(client) as Arc<dyn vm_node_autoscaler::clients::hypervisor::HypervisorClient>
        }
        Err(err) => {
            error!("failed to initialize hypervisor client: {err}");
            return ExitCode::FAILURE;
        }
    };
    let cluster = match HttpClusterClient::new(&config) {
        Ok(client) => {
            Arc::new(client) as Arc<dyn vm_node_autoscaler::clients::cluster::ClusterClient>
        }
        Err(err) => {
            error!("failed to initialize cluster client: {err}");
            return ExitCode::FAILURE;
        }
    };

    let metrics = Arc::new(Metrics::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let owned_pattern =
        vm_node_autoscaler::core::common::owned_name_regex(&config.node_name_prefix);

    let create_handle = tokio::spawn(create_worker::run_create_workers(
        queue.clone(),
        hypervisor.clone(),
        cluster.clone(),
        config.clone(),
        metrics.clone(),
        shutdown_rx.clone(),
        args.worker_concurrency,
    ));
    let destroy_handle = tokio::spawn(destroy_worker::run_destroy_workers(
        queue.clone(),
        hypervisor.clone(),
        cluster.clone(),
        owned_pattern,
        metrics.clone(),
        shutdown_rx.clone(),
        args.worker_concurrency,
    ));

    let control_loop =
        ControlLoop::with_dry_run(hypervisor, cluster, queue, config, metrics.clone(), args.dry_run);
    let control_handle = tokio::spawn(control_loop.run(shutdown_rx));

    info!("autoscaler running");
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to install shutdown signal handler: {err}");
    }
    info!("shutdown signal received, draining workers");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(create_handle, destroy_handle, control_handle);

    let format = if args.json_metrics {
        OutputFormat::Json
    } else {
        OutputFormat::PrettyTable
    };
    println!("{}", render(&metrics.snapshot(), format));

    ExitCode::SUCCESS
}
