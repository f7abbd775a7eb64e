//! Scaling configuration, loaded once at startup from environment
//! variables and immutable for the remainder of the process's life.
//!
//! Mirrors the teacher's flat `SimulationConfig` struct, but since env-var
//! loading has no serde-default machinery to hook into, defaults are
//! applied and clamped explicitly in [`Config::from_env`].

use std::env;
use std::time::Duration;

use crate::error::ScalerError;

const ENV_PREFIX: &str = "AUTOSCALER_";

/// Immutable scaling configuration (spec §3 "Scaling configuration").
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub node_cores: f64,
    pub node_memory_mib: u64,
    pub max_nodes: u64,
    pub load_headroom: f64,
    pub poll_interval: Duration,
    pub wait_join: Duration,
    pub template_ref: String,

    pub node_name_prefix: String,
    pub ssh_key: String,

    pub hypervisor_url: String,
    pub hypervisor_token: String,
    pub hypervisor_insecure: bool,

    pub cluster_api_url: String,
    pub cluster_api_token: String,
    pub cluster_api_insecure: bool,

    pub queue_host: String,
    pub queue_port: u16,
    pub queue_user: String,
    pub queue_password: String,

    /// Number of ticks between orphan-reconciliation passes (spec §4.5 step 5).
    pub orphan_reconcile_every_n_ticks: u64,
}

/// Minimum load_headroom fraction (spec §3).
pub const MIN_LOAD_HEADROOM: f64 = 0.2;
/// Minimum poll interval in seconds (spec §3).
pub const MIN_POLL_INTERVAL_S: u64 = 10;
/// Minimum join-wait timeout in seconds (spec §3).
pub const MIN_WAIT_JOIN_S: u64 = 60;
/// Default timeout applied to hypervisor/cluster calls other than join-wait (spec §5).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

impl Config {
    /// Loads configuration from `AUTOSCALER_*` environment variables,
    /// applying the clamps spec.md §3 requires (`load_headroom >= 0.2`,
    /// `poll_interval_s >= 10`, `wait_join_s >= 60`).
    pub fn from_env() -> Result<Self, ScalerError> {
        let node_cores = parse_required("NODE_CORES")?;
        let node_memory_mib = parse_required("NODE_MEMORY_MIB")?;
        let max_nodes = parse_required("MAX_NODES")?;
        let load_headroom: f64 = parse_required("LOAD_HEADROOM")?;
        let poll_interval_s: u64 = parse_required("POLL_INTERVAL_S")?;
        let wait_join_s: u64 = parse_required("WAIT_JOIN_S")?;
        let template_ref = required_string("TEMPLATE_NAME")?;
        let node_name_prefix = required_string("NODE_NAME_PREFIX")?;
        let ssh_key = required_string("SSH_KEY")?;

        let hypervisor_url = required_string("HYPERVISOR_URL")?;
        let hypervisor_token = required_string("HYPERVISOR_TOKEN")?;
        let hypervisor_insecure = optional_bool("HYPERVISOR_INSECURE", false)?;

        let cluster_api_url = required_string("CLUSTER_API_URL")?;
        let cluster_api_token = required_string("CLUSTER_API_TOKEN")?;
        let cluster_api_insecure = optional_bool("CLUSTER_API_INSECURE", false)?;

        let queue_host = required_string("QUEUE_HOST")?;
        let queue_port: u16 = parse_required("QUEUE_PORT")?;
        let queue_user = required_string("QUEUE_USER")?;
        let queue_password = required_string("QUEUE_PASSWORD")?;

        let orphan_reconcile_every_n_ticks =
            optional_parse("ORPHAN_RECONCILE_EVERY_N_TICKS", 10u64)?;

        if node_cores <= 0.0 {
            return Err(ScalerError::Config("node_cores must be positive".into()));
        }
        if node_memory_mib == 0 {
            return Err(ScalerError::Config(
                "node_memory_mib must be positive".into(),
            ));
        }
        if max_nodes == 0 {
            return Err(ScalerError::Config("max_nodes must be positive".into()));
        }

        Ok(Self {
            node_cores,
            node_memory_mib,
            max_nodes,
            load_headroom: load_headroom.max(MIN_LOAD_HEADROOM),
            poll_interval: Duration::from_secs(poll_interval_s.max(MIN_POLL_INTERVAL_S)),
            wait_join: Duration::from_secs(wait_join_s.max(MIN_WAIT_JOIN_S)),
            template_ref,
            node_name_prefix,
            ssh_key,
            hypervisor_url,
            hypervisor_token,
            hypervisor_insecure,
            cluster_api_url,
            cluster_api_token,
            cluster_api_insecure,
            queue_host,
            queue_port,
            queue_user,
            queue_password,
            orphan_reconcile_every_n_ticks,
        })
    }

    /// Node capacity as [`crate::core::common::Resources`], used by C4/C5.
    pub fn node_capacity(&self) -> crate::core::common::Resources {
        crate::core::common::Resources::new(
            self.node_cores,
            self.node_memory_mib * crate::core::common::MIB,
        )
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}")).ok()
}

fn required_string(name: &str) -> Result<String, ScalerError> {
    env_var(name).ok_or_else(|| {
        ScalerError::Config(format!("missing required env var {ENV_PREFIX}{name}"))
    })
}

fn parse_required<T: std::str::FromStr>(name: &str) -> Result<T, ScalerError> {
    let raw = required_string(name)?;
    raw.parse::<T>()
        .map_err(|_| ScalerError::Config(format!("{ENV_PREFIX}{name} is not valid: {raw:?}")))
}

fn optional_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ScalerError> {
    match env_var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ScalerError::Config(format!("{ENV_PREFIX}{name} is not valid: {raw:?}"))),
    }
}

fn optional_bool(name: &str, default: bool) -> Result<bool, ScalerError> {
    optional_parse(name, default)
}
