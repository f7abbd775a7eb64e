//! In-memory [`WorkQueue`] used by tests and by anything driving the
//! pipeline without a real broker. Honors the same ack/nack/redelivery
//! contract as the AMQP implementation so control-loop and pipeline tests
//! can run against it directly.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::core::scale_event::{ScaleEvent, ScaleEventKind};
use crate::error::{Result, ScalerError};
use crate::queue::interface::{AckHandle, AckToken, QueueDepth, WorkQueue};

struct Partition {
    ready: Mutex<VecDeque<ScaleEvent>>,
    unacked: Mutex<HashMap<u64, ScaleEvent>>,
    next_id: AtomicU64,
    notify: Notify,
}

impl Partition {
    fn new() -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            unacked: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            notify: Notify::new(),
        }
    }

    fn depth(&self) -> QueueDepth {
        QueueDepth {
            ready: self.ready.lock().unwrap().len() as u64,
            unacked: self.unacked.lock().unwrap().len() as u64,
        }
    }
}

/// Bounded, channel-partitioned FIFO with manual ack, entirely in-process.
pub struct InMemoryWorkQueue {
    create: Arc<Partition>,
    destroy: Arc<Partition>,
    capacity: u64,
    closed: Arc<AtomicBool>,
}

impl InMemoryWorkQueue {
    pub fn new(capacity: u64) -> Self {
        Self {
            create: Arc::new(Partition::new()),
            destroy: Arc::new(Partition::new()),
            capacity,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn partition(&self, kind: ScaleEventKind) -> &Arc<Partition> {
        match kind {
            ScaleEventKind::Create => &self.create,
            ScaleEventKind::Destroy => &self.destroy,
        }
    }

    /// Stops blocking consumers; any already-dequeued-but-unacked message
    /// remains unacked and will redeliver on the next call to `consume`
    /// once [`InMemoryWorkQueue::requeue_unacked`] is invoked, mirroring a
    /// broker's behavior on consumer disconnect.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.create.notify.notify_waiters();
        self.destroy.notify.notify_waiters();
    }

    /// Moves every currently-unacked message of `kind` back onto the ready
    /// queue. A real broker does this automatically when a consumer's TCP
    /// connection drops; callers simulating a crash-restart call this
    /// explicitly.
    pub fn requeue_unacked(&self, kind: ScaleEventKind) {
        let partition = self.partition(kind);
        let mut unacked = partition.unacked.lock().unwrap();
        let mut ready = partition.ready.lock().unwrap();
        for (_, event) in unacked.drain() {
            ready.push_back(event);
        }
        drop(ready);
        drop(unacked);
        partition.notify.notify_waiters();
    }
}

struct InMemoryAck {
    partition: Arc<Partition>,
    id: u64,
}

#[async_trait]
impl AckHandle for InMemoryAck {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.partition.unacked.lock().unwrap().remove(&self.id);
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<()> {
        let mut unacked = self.partition.unacked.lock().unwrap();
        if let Some(event) = unacked.remove(&self.id) {
            if requeue {
                self.partition.ready.lock().unwrap().push_front(event);
                drop(unacked);
                self.partition.notify.notify_one();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn publish(&self, event: ScaleEvent) -> Result<()> {
        let partition = self.partition(event.kind);
        let depth = partition.depth();
        if depth.total() >= self.capacity {
            return Err(ScalerError::Transport(format!(
                "queue at capacity ({}) for kind {:?}",
                self.capacity, event.kind
            )));
        }
        partition.ready.lock().unwrap().push_back(event);
        partition.notify.notify_one();
        Ok(())
    }

    async fn consume(&self, kind: ScaleEventKind) -> Result<Option<(ScaleEvent, AckToken)>> {
        let partition = self.partition(kind).clone();
        loop {
            if let Some(event) = partition.ready.lock().unwrap().pop_front() {
                let id = partition.next_id.fetch_add(1, Ordering::SeqCst);
                partition.unacked.lock().unwrap().insert(id, event.clone());
                let ack = AckToken(Box::new(InMemoryAck {
                    partition: partition.clone(),
                    id,
                }));
                return Ok(Some((event, ack)));
            }
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            partition.notify.notified().await;
        }
    }

    async fn depth(&self, kind: ScaleEventKind) -> Result<QueueDepth> {
        Ok(self.partition(kind).depth())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scale_event::ScaleEvent;

    #[tokio::test]
    async fn ack_removes_from_unacked() {
        let q = InMemoryWorkQueue::new(10);
        q.publish(ScaleEvent::create("n1", "host-01")).await.unwrap();
        let (event, ack) = q.consume(ScaleEventKind::Create).await.unwrap().unwrap();
        assert_eq!(event.node_name, "n1");
        assert_eq!(q.depth(ScaleEventKind::Create).await.unwrap().unacked, 1);
        ack.ack().await.unwrap();
        assert_eq!(q.depth(ScaleEventKind::Create).await.unwrap().unacked, 0);
    }

    #[tokio::test]
    async fn nack_with_requeue_redelivers() {
        let q = InMemoryWorkQueue::new(10);
        q.publish(ScaleEvent::create("n1", "host-01")).await.unwrap();
        let (_event, ack) = q.consume(ScaleEventKind::Create).await.unwrap().unwrap();
        ack.nack(true).await.unwrap();
        let (event, ack2) = q.consume(ScaleEventKind::Create).await.unwrap().unwrap();
        assert_eq!(event.node_name, "n1");
        ack2.ack().await.unwrap();
    }

    #[tokio::test]
    async fn nack_without_requeue_drops() {
        let q = InMemoryWorkQueue::new(10);
        q.publish(ScaleEvent::create("n1", "host-01")).await.unwrap();
        let (_event, ack) = q.consume(ScaleEventKind::Create).await.unwrap().unwrap();
        ack.nack(false).await.unwrap();
        let depth = q.depth(ScaleEventKind::Create).await.unwrap();
        assert_eq!(depth.total(), 0);
    }

    #[tokio::test]
    async fn publish_rejects_once_capacity_reached() {
        let q = InMemoryWorkQueue::new(1);
        q.publish(ScaleEvent::create("n1", "host-01")).await.unwrap();
        let err = q.publish(ScaleEvent::create("n2", "host-01")).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn kinds_are_independent_channels() {
        let q = InMemoryWorkQueue::new(10);
        q.publish(ScaleEvent::destroy("victim")).await.unwrap();
        assert_eq!(q.depth(ScaleEventKind::Create).await.unwrap().total(), 0);
        assert_eq!(q.depth(ScaleEventKind::Destroy).await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn requeue_unacked_simulates_consumer_crash() {
        let q = InMemoryWorkQueue::new(10);
        q.publish(ScaleEvent::create("n1", "host-01")).await.unwrap();
        let (_event, _ack) = q.consume(ScaleEventKind::Create).await.unwrap().unwrap();
        // consumer "crashes" without acking
        q.requeue_unacked(ScaleEventKind::Create);
        let (event, ack) = q.consume(ScaleEventKind::Create).await.unwrap().unwrap();
        assert_eq!(event.node_name, "n1");
        ack.ack().await.unwrap();
    }
}
