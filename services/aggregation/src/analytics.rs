//! Range-scan replica store
//!
//! Same contract as the point-lookup store, but rows are kept in a
//! `BTreeMap` ordered by `(merchant, kind, bucket start, category)` so
//! custom date-range queries walk a contiguous key range instead of
//! scanning the whole row set. This is the analytic-replica role in a
//! dual-write deployment; it holds the same deltas as the authoritative
//! store, applied best-effort.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use types::bucket::BucketKind;
use types::ids::{CategoryId, MerchantId};

use crate::buckets::BucketUpsert;
use crate::store::{rank, AggregateBucket, AggregateStore, StoreError, TopCategoryRow};

type RangeKey = (MerchantId, BucketKind, DateTime<Utc>, CategoryId);
type RangeMap = BTreeMap<RangeKey, AggregateBucket>;

fn apply_delta(buckets: &mut RangeMap, kind: BucketKind, delta: &BucketUpsert, now: DateTime<Utc>) {
    let key = (delta.merchant_id, kind, delta.bucket_start, delta.category_id);
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

/// Ordered store optimized for bucket-start range scans.
#[derive(Debug, Default)]
pub struct RangeScanStore {
    buckets: Mutex<RangeMap>,
}

impl RangeScanStore {
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

#[async_trait]
impl AggregateStore for RangeScanStore {
    fn label(&self) -> &'static str {
        "range-scan"
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
        let lo = (merchant_id, kind, bucket_start, CategoryId::from_i64(i64::MIN));
        let hi = (merchant_id, kind, bucket_start, CategoryId::from_i64(i64::MAX));
        let rows = buckets
            .range(lo..=hi)
            .map(|(_, row)| TopCategoryRow {
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
        let lo = (
            merchant_id,
            BucketKind::Day,
            start,
            CategoryId::from_i64(i64::MIN),
        );
        let hi = (
            merchant_id,
            BucketKind::Day,
            end,
            CategoryId::from_i64(i64::MAX),
        );
        let mut per_category: HashMap<CategoryId, TopCategoryRow> = HashMap::new();
        for (_, row) in buckets.range(lo..=hi) {
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
            .get(&(merchant_id, kind, bucket_start, category_id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn upsert(
        merchant: i64,
        category: i64,
        start: &str,
        amount: &str,
    ) -> BucketUpsert {
        BucketUpsert {
            merchant_id: MerchantId::from_i64(merchant),
            category_id: CategoryId::from_i64(category),
            bucket_start: ts(start),
            bucket_end: BucketKind::Day.bucket_end(ts(start)),
            amount_delta: dec(amount),
            units_delta: 1,
            order_count_delta: 1,
        }
    }

    #[tokio::test]
    async fn test_range_scan_stays_within_merchant() {
        let store = RangeScanStore::new();
        let now = ts("2024-01-10T00:00:00Z");
        store
            .upsert_additive(
                BucketKind::Day,
                &[
                    upsert(1, 101, "2024-01-01T00:00:00Z", "10.00"),
                    upsert(1, 101, "2024-01-02T00:00:00Z", "15.00"),
                    upsert(2, 101, "2024-01-02T00:00:00Z", "500.00"),
                ],
                now,
            )
            .await
            .unwrap();

        let rows = store
            .top_categories_range(
                MerchantId::from_i64(1),
                ts("2024-01-01T00:00:00Z"),
                ts("2024-01-07T00:00:00Z"),
                5,
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_sales_amount, dec("25.00"));
    }

    #[tokio::test]
    async fn test_range_bounds_are_inclusive() {
        let store = RangeScanStore::new();
        let now = ts("2024-01-10T00:00:00Z");
        store
            .upsert_additive(
                BucketKind::Day,
                &[
                    upsert(1, 101, "2024-01-01T00:00:00Z", "1.00"),
                    upsert(1, 101, "2024-01-07T00:00:00Z", "2.00"),
                    upsert(1, 101, "2024-01-08T00:00:00Z", "4.00"),
                ],
                now,
            )
            .await
            .unwrap();

        let rows = store
            .top_categories_range(
                MerchantId::from_i64(1),
                ts("2024-01-01T00:00:00Z"),
                ts("2024-01-07T00:00:00Z"),
                5,
            )
            .await
            .unwrap();

        assert_eq!(rows[0].total_sales_amount, dec("3.00"));
    }

    #[tokio::test]
    async fn test_point_query_matches_point_store_semantics() {
        let store = RangeScanStore::new();
        let now = ts("2024-01-10T00:00:00Z");
        store
            .upsert_additive(
                BucketKind::Week,
                &[
                    upsert(1, 101, "2024-01-01T00:00:00Z", "30.00"),
                    upsert(1, 102, "2024-01-01T00:00:00Z", "45.00"),
                ],
                now,
            )
            .await
            .unwrap();

        let rows = store
            .top_categories(
                MerchantId::from_i64(1),
                BucketKind::Week,
                ts("2024-01-01T00:00:00Z"),
                5,
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].category_id, CategoryId::from_i64(102));
    }

    #[tokio::test]
    async fn test_additive_merge() {
        let store = RangeScanStore::new();
        let now = ts("2024-01-10T00:00:00Z");
        let delta = upsert(1, 101, "2024-01-01T00:00:00Z", "10.00");
        store
            .upsert_additive(BucketKind::Day, &[delta.clone()], now)
            .await
            .unwrap();
        store
            .upsert_additive(BucketKind::Day, &[delta], now)
            .await
            .unwrap();

        let row = store
            .bucket(
                MerchantId::from_i64(1),
                CategoryId::from_i64(101),
                BucketKind::Day,
                ts("2024-01-01T00:00:00Z"),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.total_sales_amount, dec("20.00"));
        assert_eq!(store.len(), 1);
    }
}
