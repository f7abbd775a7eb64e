//! Work queue contract (spec §4.3, C3): a durable, per-kind-partitioned
//! FIFO with at-least-once delivery and per-message ack/nack.

use async_trait::async_trait;

use crate::core::scale_event::{ScaleEvent, ScaleEventKind};
use crate::error::Result;

/// Number of messages sitting ready versus delivered-but-unacked for a
/// given kind. The control loop treats `ready + unacked` as the
/// authoritative inflight count for that kind (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueDepth {
    pub ready: u64,
    pub unacked: u64,
}

impl QueueDepth {
    pub fn total(&self) -> u64 {
        self.ready + self.unacked
    }
}

/// A handle that resolves a single delivery. Dropping it without calling
/// [`AckHandle::ack`] or [`AckHandle::nack`] leaves the message unacked,
/// so it redelivers once the consumer disconnects — this is how a crashed
/// worker's in-flight event survives a restart.
#[async_trait]
pub trait AckHandle: Send + Sync {
    async fn ack(self: Box<Self>) -> Result<()>;
    async fn nack(self: Box<Self>, requeue: bool) -> Result<()>;
}

pub struct AckToken(pub Box<dyn AckHandle>);

impl AckToken {
    pub async fn ack(self) -> Result<()> {
        self.0.ack().await
    }

    pub async fn nack(self, requeue: bool) -> Result<()> {
        self.0.nack(requeue).await
    }
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn publish(&self, event: ScaleEvent) -> Result<()>;

    /// Blocks until a message of `kind` is available or the queue is
    /// closed for shutdown.
    async fn consume(&self, kind: ScaleEventKind) -> Result<Option<(ScaleEvent, AckToken)>>;

    async fn depth(&self, kind: ScaleEventKind) -> Result<QueueDepth>;
}
