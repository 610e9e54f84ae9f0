//! Broker batch consumer
//!
//! Turns raw broker payloads into parsed order events and hands them to
//! the aggregator. The whole batch is parsed before anything is
//! aggregated: one malformed payload fails the batch so the broker's
//! redelivery machinery re-delivers it; a bad payload must never be
//! silently acked. Batches from one partition are processed strictly in
//! sequence by construction (one consumer per partition); independent
//! partitions run in parallel.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};
use types::order::OrderEventPayload;

use crate::aggregator::{AggregationError, BatchOutcome, SalesAggregator};

/// Batch consumer for one partition's order event stream.
pub struct OrderEventsConsumer {
    aggregator: Arc<SalesAggregator>,
    batches_processed: u64,
    batches_failed: u64,
    events_seen: u64,
    duplicates_skipped: u64,
}

impl OrderEventsConsumer {
    pub fn new(aggregator: Arc<SalesAggregator>) -> Self {
        Self {
            aggregator,
            batches_processed: 0,
            batches_failed: 0,
            events_seen: 0,
            duplicates_skipped: 0,
        }
    }

    /// Process one batch of raw payloads end to end.
    pub async fn process_batch(
        &mut self,
        raw: &[Vec<u8>],
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome, AggregationError> {
        let mut events: Vec<OrderEventPayload> = Vec::with_capacity(raw.len());
        for (index, payload) in raw.iter().enumerate() {
            match serde_json::from_slice(payload) {
                Ok(event) => events.push(event),
                Err(err) => {
                    self.batches_failed += 1;
                    error!(
                        index,
                        error = %err,
                        "Undecodable order event payload; failing batch for redelivery"
                    );
                    return Err(AggregationError::Deserialize {
                        index,
                        detail: err.to_string(),
                    });
                }
            }
        }

        match self.aggregator.aggregate(&events, now).await {
            Ok(outcome) => {
                self.batches_processed += 1;
                self.events_seen += outcome.total as u64;
                self.duplicates_skipped += outcome.duplicates as u64;
                info!(
                    total = outcome.total,
                    fresh = outcome.fresh,
                    duplicates = outcome.duplicates,
                    "Order event batch processed"
                );
                Ok(outcome)
            }
            Err(err) => {
                self.batches_failed += 1;
                Err(err)
            }
        }
    }

    /// Batches fully processed since creation.
    pub fn batches_processed(&self) -> u64 {
        self.batches_processed
    }

    /// Batches failed (parse or store) since creation.
    pub fn batches_failed(&self) -> u64 {
        self.batches_failed
    }

    /// Events seen across processed batches.
    pub fn events_seen(&self) -> u64 {
        self.events_seen
    }

    /// Events skipped as duplicates across processed batches.
    pub fn duplicates_skipped(&self) -> u64 {
        self.duplicates_skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::InMemoryIdempotencyGuard;
    use crate::store::InMemoryAggregateStore;
    use crate::writer::AggregateWriter;
    use types::ids::{CategoryId, MerchantId, OrderId};
    use types::order::OrderLine;
    use uuid::Uuid;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn consumer() -> OrderEventsConsumer {
        let guard = Arc::new(InMemoryIdempotencyGuard::new());
        let store = Arc::new(InMemoryAggregateStore::new());
        OrderEventsConsumer::new(Arc::new(SalesAggregator::new(
            guard,
            AggregateWriter::new(store),
        )))
    }

    fn payload(order_id: i64) -> Vec<u8> {
        let event = OrderEventPayload {
            order_id: OrderId::from_i64(order_id),
            merchant_id: MerchantId::from_i64(1),
            order_date: ts("2024-01-01T10:00:00Z"),
            items: vec![OrderLine {
                category_id: CategoryId::from_i64(101),
                quantity: 3,
                line_amount: "30.00".parse().unwrap(),
            }],
            correlation_id: Uuid::now_v7(),
        };
        serde_json::to_vec(&event).unwrap()
    }

    #[tokio::test]
    async fn test_clean_batch_processes() {
        let mut consumer = consumer();
        let outcome = consumer
            .process_batch(&[payload(1), payload(2)], ts("2024-01-01T11:00:00Z"))
            .await
            .unwrap();

        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.fresh, 2);
        assert_eq!(consumer.batches_processed(), 1);
        assert_eq!(consumer.events_seen(), 2);
    }

    #[tokio::test]
    async fn test_malformed_payload_fails_whole_batch() {
        let mut consumer = consumer();
        let result = consumer
            .process_batch(
                &[payload(1), b"not json".to_vec()],
                ts("2024-01-01T11:00:00Z"),
            )
            .await;

        match result {
            Err(AggregationError::Deserialize { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected Deserialize error, got {other:?}"),
        }
        assert_eq!(consumer.batches_failed(), 1);
        assert_eq!(consumer.batches_processed(), 0);

        // Redelivery of a corrected batch succeeds; the good event from the
        // failed batch was never aggregated, so it is not a duplicate now.
        let outcome = consumer
            .process_batch(&[payload(1)], ts("2024-01-01T11:05:00Z"))
            .await
            .unwrap();
        assert_eq!(outcome.fresh, 1);
    }

    #[tokio::test]
    async fn test_redelivered_batch_counts_duplicates() {
        let mut consumer = consumer();
        let batch = [payload(1), payload(2)];
        let now = ts("2024-01-01T11:00:00Z");

        consumer.process_batch(&batch, now).await.unwrap();
        let outcome = consumer.process_batch(&batch, now).await.unwrap();

        assert_eq!(outcome.fresh, 0);
        assert_eq!(outcome.duplicates, 2);
        assert_eq!(consumer.duplicates_skipped(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let mut consumer = consumer();
        let outcome = consumer
            .process_batch(&[], ts("2024-01-01T11:00:00Z"))
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome::default());
    }
}
