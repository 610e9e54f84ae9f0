//! Broker seam
//!
//! The publisher only needs one operation from the broker: send a payload
//! under a partition key and wait for the acknowledgment. Transport and
//! wire format stay behind this trait; the crate ships an in-process
//! partitioned broker used by tests and the simulation runner.
//!
//! Partitioning contract: payloads sharing a key land on one partition in
//! send order, so per-order delivery order is preserved end to end.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use types::ids::OrderId;

/// Errors surfaced by a broker send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker did not acknowledge within the configured timeout")]
    Timeout,

    #[error("broker closed")]
    Closed,
}

/// Acknowledgment returned once the broker has accepted a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerAck {
    pub partition: u32,
    pub offset: u64,
}

/// Minimal producer-side broker contract.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Send one payload; resolves only when the broker has accepted it.
    async fn send(
        &self,
        topic: &str,
        key: OrderId,
        payload: &[u8],
    ) -> Result<BrokerAck, BrokerError>;
}

// ── In-process broker ───────────────────────────────────────────────

/// Broker backed by bounded in-process channels, one per partition.
///
/// `partition = key mod partition_count`, per-partition offsets are
/// monotonic. Sends block when a partition's channel is full, which gives
/// the same backpressure shape as a slow external broker.
pub struct InProcessBroker {
    senders: Vec<mpsc::Sender<Vec<u8>>>,
    offsets: Vec<AtomicU64>,
}

/// Consumer handle for one partition of an [`InProcessBroker`].
pub struct PartitionConsumer {
    partition: u32,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl InProcessBroker {
    /// Create a broker with `partitions` partitions and the given channel
    /// capacity, returning one consumer handle per partition.
    pub fn new(partitions: u32, capacity: usize) -> (Arc<Self>, Vec<PartitionConsumer>) {
        assert!(partitions > 0, "broker needs at least one partition");
        let mut senders = Vec::with_capacity(partitions as usize);
        let mut consumers = Vec::with_capacity(partitions as usize);
        for partition in 0..partitions {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            consumers.push(PartitionConsumer { partition, rx });
        }
        let offsets = (0..partitions).map(|_| AtomicU64::new(0)).collect();
        (Arc::new(Self { senders, offsets }), consumers)
    }

    fn partition_for(&self, key: OrderId) -> usize {
        (key.as_i64().unsigned_abs() % self.senders.len() as u64) as usize
    }
}

#[async_trait]
impl Broker for InProcessBroker {
    async fn send(
        &self,
        topic: &str,
        key: OrderId,
        payload: &[u8],
    ) -> Result<BrokerAck, BrokerError> {
        let partition = self.partition_for(key);
        self.senders[partition]
            .send(payload.to_vec())
            .await
            .map_err(|_| BrokerError::Closed)?;
        let offset = self.offsets[partition].fetch_add(1, Ordering::SeqCst);
        debug!(topic, key = %key, partition, offset, "Payload accepted");
        Ok(BrokerAck {
            partition: partition as u32,
            offset,
        })
    }
}

impl PartitionConsumer {
    /// Partition this handle consumes.
    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Receive the next batch: waits for at least one payload, then drains
    /// whatever else is immediately available up to `max_batch`.
    ///
    /// Returns `None` once the broker is dropped and the partition is
    /// drained.
    pub async fn recv_batch(&mut self, max_batch: usize) -> Option<Vec<Vec<u8>>> {
        let first = self.rx.recv().await?;
        let mut batch = vec![first];
        while batch.len() < max_batch {
            match self.rx.try_recv() {
                Ok(payload) => batch.push(payload),
                Err(_) => break,
            }
        }
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_returns_partition_and_offset() {
        let (broker, _consumers) = InProcessBroker::new(4, 16);

        let ack1 = broker
            .send("order-events", OrderId::from_i64(8), b"a")
            .await
            .unwrap();
        let ack2 = broker
            .send("order-events", OrderId::from_i64(8), b"b")
            .await
            .unwrap();

        assert_eq!(ack1.partition, ack2.partition);
        assert_eq!(ack1.offset, 0);
        assert_eq!(ack2.offset, 1);
    }

    #[tokio::test]
    async fn test_same_key_lands_on_same_partition() {
        let (broker, _consumers) = InProcessBroker::new(3, 16);

        let mut partitions = std::collections::HashSet::new();
        for _ in 0..5 {
            let ack = broker
                .send("order-events", OrderId::from_i64(42), b"x")
                .await
                .unwrap();
            partitions.insert(ack.partition);
        }
        assert_eq!(partitions.len(), 1);
    }

    #[tokio::test]
    async fn test_consumer_receives_in_send_order() {
        let (broker, mut consumers) = InProcessBroker::new(1, 16);

        for i in 0u8..3 {
            broker
                .send("order-events", OrderId::from_i64(1), &[i])
                .await
                .unwrap();
        }

        let batch = consumers[0].recv_batch(10).await.unwrap();
        assert_eq!(batch, vec![vec![0u8], vec![1], vec![2]]);
    }

    #[tokio::test]
    async fn test_recv_batch_respects_max() {
        let (broker, mut consumers) = InProcessBroker::new(1, 16);

        for i in 0u8..5 {
            broker
                .send("order-events", OrderId::from_i64(1), &[i])
                .await
                .unwrap();
        }

        let batch = consumers[0].recv_batch(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        let rest = consumers[0].recv_batch(10).await.unwrap();
        assert_eq!(rest.len(), 3);
    }

    #[tokio::test]
    async fn test_recv_returns_none_after_broker_dropped() {
        let (broker, mut consumers) = InProcessBroker::new(1, 16);
        broker
            .send("order-events", OrderId::from_i64(1), b"last")
            .await
            .unwrap();
        drop(broker);

        assert!(consumers[0].recv_batch(10).await.is_some());
        assert!(consumers[0].recv_batch(10).await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_consumers_dropped_is_closed() {
        let (broker, consumers) = InProcessBroker::new(1, 16);
        drop(consumers);

        let result = broker.send("order-events", OrderId::from_i64(1), b"x").await;
        assert_eq!(result, Err(BrokerError::Closed));
    }
}
