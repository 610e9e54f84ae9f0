//! Bucketing engine
//!
//! Pure, stateless fold from one already-deduplicated batch of order
//! events to per-key sales deltas, computing all three granularities in a
//! single pass so decimal arithmetic stays centralized and derived buckets
//! cannot drift apart. Output is always a delta, never an absolute total;
//! the stores merge deltas additively.
//!
//! Accumulation state lives in the returned [`BucketDeltas`] value, so
//! independent batches can fold in parallel without sharing anything.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use types::bucket::BucketKind;
use types::ids::{CategoryId, MerchantId};
use types::order::{OrderEventPayload, OrderLine};

/// Identity of one aggregate bucket within a granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationKey {
    pub merchant_id: MerchantId,
    pub category_id: CategoryId,
    /// Normalized bucket start (see [`BucketKind::bucket_start`]).
    pub bucket_start: DateTime<Utc>,
}

/// Accumulated sales totals for one aggregation key.
///
/// `order_count` counts line-item contributions, not distinct orders: an
/// order with two lines in the same category bumps the bucket's count
/// twice. That matches the upstream reports this pipeline feeds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SalesTotals {
    pub total_amount: Decimal,
    pub total_units: u64,
    pub order_count: u64,
}

impl SalesTotals {
    /// Fold one order line into the totals.
    pub fn add_line(&mut self, line: &OrderLine) {
        self.total_amount += line.line_amount;
        self.total_units += u64::from(line.quantity);
        self.order_count += 1;
    }

    /// Fold another totals value into this one.
    pub fn merge(&mut self, other: &SalesTotals) {
        self.total_amount += other.total_amount;
        self.total_units += other.total_units;
        self.order_count += other.order_count;
    }
}

/// One delta ready for an additive upsert, with the bucket window made
/// explicit for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketUpsert {
    pub merchant_id: MerchantId,
    pub category_id: CategoryId,
    pub bucket_start: DateTime<Utc>,
    pub bucket_end: DateTime<Utc>,
    pub amount_delta: Decimal,
    pub units_delta: u64,
    pub order_count_delta: u64,
}

/// Per-granularity delta maps produced by folding one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketDeltas {
    pub day: HashMap<AggregationKey, SalesTotals>,
    pub week: HashMap<AggregationKey, SalesTotals>,
    pub month: HashMap<AggregationKey, SalesTotals>,
}

impl BucketDeltas {
    /// The delta map for one granularity.
    pub fn map(&self, kind: BucketKind) -> &HashMap<AggregationKey, SalesTotals> {
        match kind {
            BucketKind::Day => &self.day,
            BucketKind::Week => &self.week,
            BucketKind::Month => &self.month,
        }
    }

    fn map_mut(&mut self, kind: BucketKind) -> &mut HashMap<AggregationKey, SalesTotals> {
        match kind {
            BucketKind::Day => &mut self.day,
            BucketKind::Week => &mut self.week,
            BucketKind::Month => &mut self.month,
        }
    }

    /// Whether no bucket in any granularity accumulated anything.
    pub fn is_empty(&self) -> bool {
        self.day.is_empty() && self.week.is_empty() && self.month.is_empty()
    }

    /// Merge another batch's deltas into this one (order-independent).
    pub fn merge(&mut self, other: &BucketDeltas) {
        for kind in BucketKind::all() {
            let target = self.map_mut(*kind);
            for (key, totals) in other.map(*kind) {
                target.entry(*key).or_default().merge(totals);
            }
        }
    }

    /// Upsert rows for one granularity, bucket ends derived from the key.
    pub fn upserts(&self, kind: BucketKind) -> Vec<BucketUpsert> {
        self.map(kind)
            .iter()
            .map(|(key, totals)| BucketUpsert {
                merchant_id: key.merchant_id,
                category_id: key.category_id,
                bucket_start: key.bucket_start,
                bucket_end: kind.bucket_end(key.bucket_start),
                amount_delta: totals.total_amount,
                units_delta: totals.total_units,
                order_count_delta: totals.order_count,
            })
            .collect()
    }
}

/// Fold a batch of deduplicated order events into per-key deltas for all
/// three granularities in one pass.
pub fn fold_events<'a, I>(events: I) -> BucketDeltas
where
    I: IntoIterator<Item = &'a OrderEventPayload>,
{
    let mut deltas = BucketDeltas::default();
    for event in events {
        for line in &event.items {
            for kind in BucketKind::all() {
                let key = AggregationKey {
                    merchant_id: event.merchant_id,
                    category_id: line.category_id,
                    bucket_start: kind.bucket_start(event.order_date),
                };
                deltas.map_mut(*kind).entry(key).or_default().add_line(line);
            }
        }
    }
    deltas
}
