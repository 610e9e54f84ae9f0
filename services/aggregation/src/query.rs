//! Top-category query service
//!
//! Read-only ranking over the aggregate stores. The request shape picks
//! the store: exact-bucket lookups go to the point-lookup store, custom
//! date ranges go to the range-scan store (summing DAY buckets). Rows are
//! ordered by descending sales amount (tie order between equal amounts is
//! unspecified) and category ids are enriched with display names from the
//! catalog, falling back to a placeholder for unknown ids.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use types::bucket::BucketKind;
use types::ids::{CategoryId, MerchantId};

use crate::catalog::{placeholder_name, CategoryCatalog};
use crate::store::{AggregateStore, StoreError, TopCategoryRow};

/// Errors from the top-category read path.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid query range: start {start} is after end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One enriched ranking row returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopCategory {
    pub category_id: CategoryId,
    pub category_name: String,
    pub total_sales_amount: Decimal,
    pub total_units_sold: u64,
    pub order_count: u64,
}

/// Query service over the point-lookup store, the range-scan store, and
/// the category catalog.
pub struct TopCategoryQuery {
    point_store: Arc<dyn AggregateStore>,
    range_store: Arc<dyn AggregateStore>,
    catalog: Arc<dyn CategoryCatalog>,
}

impl TopCategoryQuery {
    pub fn new(
        point_store: Arc<dyn AggregateStore>,
        range_store: Arc<dyn AggregateStore>,
        catalog: Arc<dyn CategoryCatalog>,
    ) -> Self {
        Self {
            point_store,
            range_store,
            catalog,
        }
    }

    /// Top categories for one exact bucket.
    ///
    /// `bucket_start` is normalized onto the kind's boundary, so callers
    /// may pass any timestamp inside the bucket.
    pub async fn top_categories(
        &self,
        merchant_id: MerchantId,
        kind: BucketKind,
        bucket_start: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TopCategory>, QueryError> {
        let start = kind.bucket_start(bucket_start);
        debug!(
            merchant = %merchant_id,
            kind = kind.as_str(),
            bucket_start = %start,
            limit,
            "Top-category point query"
        );
        let rows = self
            .point_store
            .top_categories(merchant_id, kind, start, limit)
            .await?;
        Ok(self.enrich(rows).await)
    }

    /// Top categories over a custom date range, summed from DAY buckets
    /// whose start falls within `[start, end]`.
    pub async fn top_categories_range(
        &self,
        merchant_id: MerchantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TopCategory>, QueryError> {
        if start > end {
            return Err(QueryError::InvalidRange { start, end });
        }
        let start = BucketKind::Day.bucket_start(start);
        let end = BucketKind::Day.bucket_start(end);
        debug!(
            merchant = %merchant_id,
            start = %start,
            end = %end,
            limit,
            "Top-category range query"
        );
        let rows = self
            .range_store
            .top_categories_range(merchant_id, start, end, limit)
            .await?;
        Ok(self.enrich(rows).await)
    }

    /// Join display names onto ranking rows in one catalog call.
    async fn enrich(&self, rows: Vec<TopCategoryRow>) -> Vec<TopCategory> {
        let ids: Vec<CategoryId> = rows.iter().map(|row| row.category_id).collect();
        let names = self.catalog.names_of(&ids).await;
        rows.into_iter()
            .map(|row| TopCategory {
                category_id: row.category_id,
                category_name: names
                    .get(&row.category_id)
                    .cloned()
                    .unwrap_or_else(|| placeholder_name(row.category_id)),
                total_sales_amount: row.total_sales_amount,
                total_units_sold: row.total_units_sold,
                order_count: row.order_count,
            })
            .collect()
    }
}
