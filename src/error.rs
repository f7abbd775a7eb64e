//! Error taxonomy for the autoscaler.
//!
//! Mirrors the five error kinds the control loop and pipeline workers need
//! to tell apart: a config error is fatal at startup, the rest are handled
//! in place (retried, treated as idempotent success, or dropped).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScalerError {
    /// Fatal at startup only; the process exits with a non-zero code.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network failure talking to the queue, hypervisor, or cluster API.
    /// Retried with capped exponential backoff at the worker.
    #[error("transport error: {0}")]
    Transport(String),

    /// Remote side reports something unexpected but recoverable, e.g. a
    /// name collision or a node that is already gone.
    #[error("remote state error: {0}")]
    RemoteState(String),

    /// A deadline (join wait, VM-start wait) elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A safety invariant would be violated by the requested action.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl ScalerError {
    /// Transient errors are worth a nack-with-requeue; everything else
    /// should be dropped (see spec §7 propagation rules).
    pub fn is_transient(&self) -> bool {
        matches!(self, ScalerError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, ScalerError>;
