//! Aggregate store contract and the point-lookup store
//!
//! Stores hold one [`AggregateBucket`] per aggregation key and expose an
//! additive upsert: insert on first contribution, add deltas onto existing
//! totals afterwards, never overwrite. Each `upsert_additive` call applies
//! its whole batch under one lock, so a batch lands entirely or not at all
//! and concurrent writers to the same key cannot race a read-modify-write.
//! Rows are never deleted; no caller may overwrite a bucket directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;
use types::bucket::BucketKind;
use types::ids::{CategoryId, MerchantId};

use crate::buckets::BucketUpsert;

/// Errors surfaced by aggregate store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// One persisted aggregate row, unique per
/// (merchant, category, bucket kind, bucket start).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub merchant_id: MerchantId,
    pub category_id: CategoryId,
    pub bucket_type: BucketKind,
    pub bucket_start: DateTime<Utc>,
    pub bucket_end: DateTime<Utc>,
    pub total_sales_amount: Decimal,
    pub total_units_sold: u64,
    pub order_count: u64,
    pub updated_at: DateTime<Utc>,
}

/// One ranking row returned by the store-level top-category queries.
/// Category names are joined in later by the query service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopCategoryRow {
    pub category_id: CategoryId,
    pub total_sales_amount: Decimal,
    pub total_units_sold: u64,
    pub order_count: u64,
}

/// The aggregate store contract shared by the authoritative store and the
/// analytic replicas.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Short name used in logs when a dual-write partially fails.
    fn label(&self) -> &'static str;

    /// Apply a batch of deltas: insert-or-add per key, refresh
    /// `updated_at`, all-or-nothing per call.
    async fn upsert_additive(
        &self,
        kind: BucketKind,
        deltas: &[BucketUpsert],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Apply deltas for every granularity as one unit of work.
    ///
    /// The default implementation loops over [`upsert_additive`] per kind
    /// and is not atomic across kinds; stores that can commit the whole
    /// batch at once override it. The writer always goes through this for
    /// the authoritative store.
    ///
    /// [`upsert_additive`]: AggregateStore::upsert_additive
    async fn upsert_all(
        &self,
        batch: &[(BucketKind, Vec<BucketUpsert>)],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        for (kind, deltas) in batch {
            self.upsert_additive(*kind, deltas, now).await?;
        }
        Ok(())
    }

    /// Rank categories for one exact bucket by descending sales amount.
    /// Tie order between equal amounts is unspecified.
    async fn top_categories(
        &self,
        merchant_id: MerchantId,
        kind: BucketKind,
        bucket_start: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TopCategoryRow>, StoreError>;

    /// Rank categories over all DAY buckets whose start falls within
    /// `[start, end]` (summed per category).
    async fn top_categories_range(
        &self,
        merchant_id: MerchantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TopCategoryRow>, StoreError>;

    /// Point read of a single bucket.
    async fn bucket(
        &self,
        merchant_id: MerchantId,
        category_id: CategoryId,
        kind: BucketKind,
        bucket_start: DateTime<Utc>,
    ) -> Result<Option<AggregateBucket>, StoreError>;
}

/// Rank rows by descending amount and truncate to `limit`.
///
/// Sorting is on amount only: callers must not depend on tie order.
pub(crate) fn rank(mut rows: Vec<TopCategoryRow>, limit: usize) -> Vec<TopCategoryRow> {
    rows.sort_by(|a, b| b.total_sales_amount.cmp(&a.total_sales_amount));
    rows.truncate(limit);
    rows
}

// ── Point-lookup store ──────────────────────────────────────────────

type BucketMap = HashMap<(BucketKind, MerchantId, CategoryId, DateTime<Utc>), AggregateBucket>;

/// Hash-keyed store optimized for exact-bucket lookups. Serves as the
/// authoritative store in the default wiring.
#[derive(Debug, Default)]
pub struct InMemoryAggregateStore {
    buckets: Mutex<BucketMap>,
}

impl InMemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows across all granularities.
    pub fn len(&self) -> usize {
        self.buckets.lock().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn apply_delta(buckets: &mut BucketMap, kind: BucketKind, delta: &BucketUpsert, now: DateTime<Utc>) {
    let key = (kind, delta.merchant_id, delta.category_id, delta.bucket_start);
    match buckets.get_mut(&key) {
        Some(row) => {
            row.total_sales_amount += delta.amount_delta;
            row.total_units_sold += delta.units_delta;
            row.order_count += delta.order_count_delta;
            row.updated_at = now;
        }
        None => {
            buckets.insert(
                key,
                AggregateBucket {
                    merchant_id: delta.merchant_id,
                    category_id: delta.category_id,
                    bucket_type: kind,
                    bucket_start: delta.bucket_start,
                    bucket_end: delta.bucket_end,
                    total_sales_amount: delta.amount_delta,
                    total_units_sold: delta.units_delta,
                    order_count: delta.order_count_delta,
                    updated_at: now,
                },
            );
        }
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    fn label(&self) -> &'static str {
        "point-lookup"
    }

    async fn upsert_additive(
        &self,
        kind: BucketKind,
        deltas: &[BucketUpsert],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut buckets = self.buckets.lock().expect("store lock poisoned");
        for delta in deltas {
            apply_delta(&mut buckets, kind, delta, now);
        }
        debug!(
            kind = kind.as_str(),
            deltas = deltas.len(),
            "Applied additive upsert"
        );
        Ok(())
    }

    async fn upsert_all(
        &self,
        batch: &[(BucketKind, Vec<BucketUpsert>)],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // One lock acquisition: the whole batch lands atomically.
        let mut buckets = self.buckets.lock().expect("store lock poisoned");
        for (kind, deltas) in batch {
            for delta in deltas {
                apply_delta(&mut buckets, *kind, delta, now);
            }
        }
        Ok(())
    }

    async fn top_categories(
        &self,
        merchant_id: MerchantId,
        kind: BucketKind,
        bucket_start: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TopCategoryRow>, StoreError> {
        let buckets = self.buckets.lock().expect("store lock poisoned");
        let rows = buckets
            .values()
            .filter(|row| {
                row.merchant_id == merchant_id
                    && row.bucket_type == kind
                    && row.bucket_start == bucket_start
            })
            .map(|row| TopCategoryRow {
                category_id: row.category_id,
                total_sales_amount: row.total_sales_amount,
                total_units_sold: row.total_units_sold,
                order_count: row.order_count,
            })
            .collect();
        Ok(rank(rows, limit))
    }

    async fn top_categories_range(
        &self,
        merchant_id: MerchantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TopCategoryRow>, StoreError> {
        let buckets = self.buckets.lock().expect("store lock poisoned");
        let mut per_category: HashMap<CategoryId, TopCategoryRow> = HashMap::new();
        for row in buckets.values().filter(|row| {
            row.merchant_id == merchant_id
                && row.bucket_type == BucketKind::Day
                && row.bucket_start >= start
                && row.bucket_start <= end
        }) {
            let entry = per_category
                .entry(row.category_id)
                .or_insert_with(|| TopCategoryRow {
                    category_id: row.category_id,
                    total_sales_amount: Decimal::ZERO,
                    total_units_sold: 0,
                    order_count: 0,
                });
            entry.total_sales_amount += row.total_sales_amount;
            entry.total_units_sold += row.total_units_sold;
            entry.order_count += row.order_count;
        }
        Ok(rank(per_category.into_values().collect(), limit))
    }

    async fn bucket(
        &self,
        merchant_id: MerchantId,
        category_id: CategoryId,
        kind: BucketKind,
        bucket_start: DateTime<Utc>,
    ) -> Result<Option<AggregateBucket>, StoreError> {
        let buckets = self.buckets.lock().expect("store lock poisoned");
        Ok(buckets
            .get(&(kind, merchant_id, category_id, bucket_start))
            .cloned())
    }
}
