//! Sales aggregator — the per-batch unit of work
//!
//! Order of operations matters here:
//! 1. batch-check the idempotency guard and drop known orders,
//! 2. fold the fresh remainder into bucket deltas,
//! 3. write the authoritative store (strict) and replicas (best-effort),
//! 4. only then claim the markers.
//!
//! An authoritative write failure therefore leaves no markers behind, so
//! the broker's redelivery of the batch retries cleanly. A crash between
//! the store write and the claim re-applies the batch on redelivery; the
//! guard still holds no markers for it, and re-claiming is the recoverable
//! window the additive contract tolerates.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use types::ids::OrderId;
use types::order::OrderEventPayload;

use crate::buckets::fold_events;
use crate::dedup::IdempotencyGuard;
use crate::store::StoreError;
use crate::writer::AggregateWriter;

/// Errors from consuming and aggregating one batch.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// A payload in the batch failed to deserialize; the whole batch is
    /// failed so the broker redelivers it.
    #[error("undecodable payload at batch index {index}: {detail}")]
    Deserialize { index: usize, detail: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Summary of one aggregated batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    /// Events in the incoming batch.
    pub total: usize,
    /// Events aggregated after deduplication.
    pub fresh: usize,
    /// Events dropped as already-aggregated duplicates.
    pub duplicates: usize,
    /// Distinct DAY buckets touched.
    pub day_buckets: usize,
    /// Distinct WEEK buckets touched.
    pub week_buckets: usize,
    /// Distinct MONTH buckets touched.
    pub month_buckets: usize,
}

/// Folds deduplicated batches into the aggregate stores.
pub struct SalesAggregator {
    guard: Arc<dyn IdempotencyGuard>,
    writer: AggregateWriter,
}

impl SalesAggregator {
    pub fn new(guard: Arc<dyn IdempotencyGuard>, writer: AggregateWriter) -> Self {
        Self { guard, writer }
    }

    /// Aggregate one batch of already-parsed events.
    pub async fn aggregate(
        &self,
        events: &[OrderEventPayload],
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome, AggregationError> {
        let keys: Vec<OrderId> = events.iter().map(|e| e.order_id).collect();
        let mut fresh_keys: HashSet<OrderId> =
            self.guard.find_unprocessed(&keys).await?.into_iter().collect();

        // Keep the first occurrence per fresh order id; everything else in
        // the batch is a redelivered duplicate.
        let fresh_events: Vec<&OrderEventPayload> = events
            .iter()
            .filter(|e| fresh_keys.remove(&e.order_id))
            .collect();
        let duplicates = events.len() - fresh_events.len();
        if duplicates > 0 {
            debug!(duplicates, "Skipping already-aggregated orders");
        }

        if fresh_events.is_empty() {
            return Ok(BatchOutcome {
                total: events.len(),
                duplicates,
                ..BatchOutcome::default()
            });
        }

        let deltas = fold_events(fresh_events.iter().copied());

        // Authoritative store first; markers only after it succeeds.
        self.writer.write(&deltas, now).await?;

        let claimed: Vec<OrderId> = fresh_events.iter().map(|e| e.order_id).collect();
        self.guard.claim(&claimed, now).await?;

        let outcome = BatchOutcome {
            total: events.len(),
            fresh: fresh_events.len(),
            duplicates,
            day_buckets: deltas.day.len(),
            week_buckets: deltas.week.len(),
            month_buckets: deltas.month.len(),
        };
        info!(
            total = outcome.total,
            fresh = outcome.fresh,
            duplicates = outcome.duplicates,
            day = outcome.day_buckets,
            week = outcome.week_buckets,
            month = outcome.month_buckets,
            "Aggregated order batch"
        );
        Ok(outcome)
    }

    /// The writer (and through it, the stores) behind this aggregator.
    pub fn writer(&self) -> &AggregateWriter {
        &self.writer
    }
}
