//! Dual-write fan-out
//!
//! Applies one batch's deltas to every configured store. The authoritative
//! store is strict: its failure propagates and fails the batch's unit of
//! work before any idempotency markers commit. Replicas are best-effort:
//! a replica failure is logged and counted but never rolls anything back
//! and never fails the batch; it leaves a gap for out-of-band
//! reconciliation. Heterogeneous stores get no distributed transaction.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;
use types::bucket::BucketKind;

use crate::buckets::{BucketDeltas, BucketUpsert};
use crate::store::{AggregateStore, StoreError};

/// Fan-out writer over one authoritative store and N replicas.
pub struct AggregateWriter {
    authoritative: Arc<dyn AggregateStore>,
    replicas: Vec<Arc<dyn AggregateStore>>,
    replica_failures: AtomicU64,
}

impl AggregateWriter {
    pub fn new(authoritative: Arc<dyn AggregateStore>) -> Self {
        Self {
            authoritative,
            replicas: Vec::new(),
            replica_failures: AtomicU64::new(0),
        }
    }

    /// Add a best-effort replica receiving the same deltas.
    pub fn with_replica(mut self, replica: Arc<dyn AggregateStore>) -> Self {
        self.replicas.push(replica);
        self
    }

    /// Apply one batch's deltas to all stores.
    ///
    /// Returns `Err` only for the authoritative store; when it does, no
    /// replica has been written either (replicas go second).
    pub async fn write(
        &self,
        deltas: &BucketDeltas,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let batch: Vec<(BucketKind, Vec<BucketUpsert>)> = BucketKind::all()
            .iter()
            .map(|kind| (*kind, deltas.upserts(*kind)))
            .filter(|(_, upserts)| !upserts.is_empty())
            .collect();
        if batch.is_empty() {
            return Ok(());
        }

        self.authoritative.upsert_all(&batch, now).await?;

        for replica in &self.replicas {
            if let Err(err) = replica.upsert_all(&batch, now).await {
                self.replica_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    store = replica.label(),
                    error = %err,
                    "Replica aggregate write failed; authoritative store is unaffected"
                );
            }
        }

        Ok(())
    }

    /// Replica writes that failed since creation (reconciliation gaps).
    pub fn replica_failures(&self) -> u64 {
        self.replica_failures.load(Ordering::Relaxed)
    }

    /// The authoritative store behind this writer.
    pub fn authoritative(&self) -> &Arc<dyn AggregateStore> {
        &self.authoritative
    }
}
