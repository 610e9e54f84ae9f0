//! Idempotency guard
//!
//! Persisted set of order ids whose aggregation has already succeeded.
//! A marker exists for an order only once every bucket derived from it has
//! been folded into the authoritative store, so the guard is what turns
//! at-least-once delivery into exactly-once effect. Membership checks are
//! batched; claiming an already-claimed key is a no-op, never an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use types::ids::OrderId;

use crate::store::StoreError;

/// One claim: an order aggregated at `processed_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    pub order_id: OrderId,
    pub processed_at: DateTime<Utc>,
}

/// Guard contract checked and updated around every aggregation batch.
#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    /// The subset of `keys` with no marker yet, in input order. One batch
    /// membership check, not a round trip per key; duplicate input keys
    /// are reported once.
    async fn find_unprocessed(&self, keys: &[OrderId]) -> Result<Vec<OrderId>, StoreError>;

    /// Record markers for `keys`. Append-only: keys already claimed are
    /// silently kept with their original timestamp.
    async fn claim(&self, keys: &[OrderId], at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Guard backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyGuard {
    markers: Mutex<HashMap<OrderId, DateTime<Utc>>>,
}

impl InMemoryIdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marker for one order, if claimed.
    pub fn marker(&self, order_id: OrderId) -> Option<Marker> {
        self.markers
            .lock()
            .expect("guard lock poisoned")
            .get(&order_id)
            .map(|at| Marker {
                order_id,
                processed_at: *at,
            })
    }

    /// Number of claimed orders.
    pub fn len(&self) -> usize {
        self.markers.lock().expect("guard lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdempotencyGuard for InMemoryIdempotencyGuard {
    async fn find_unprocessed(&self, keys: &[OrderId]) -> Result<Vec<OrderId>, StoreError> {
        let markers = self.markers.lock().expect("guard lock poisoned");
        let mut seen = std::collections::HashSet::with_capacity(keys.len());
        Ok(keys
            .iter()
            .copied()
            .filter(|key| !markers.contains_key(key) && seen.insert(*key))
            .collect())
    }

    async fn claim(&self, keys: &[OrderId], at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut markers = self.markers.lock().expect("guard lock poisoned");
        for key in keys {
            markers.entry(*key).or_insert(at);
        }
        debug!(claimed = keys.len(), total = markers.len(), "Markers recorded");
        Ok(())
    }
}
