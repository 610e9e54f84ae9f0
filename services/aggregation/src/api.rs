//! Read API for top-category rankings
//!
//! Two GET endpoints over the query service:
//! - `/api/top-categories` — exact bucket
//!   (`merchantId`, `bucketType`, `bucketStart`, `limit`)
//! - `/api/top-categories/range` — custom date range
//!   (`merchantId`, `startDate`, `endDate`, `limit`)
//!
//! Responses are JSON arrays of enriched ranking rows; decimal amounts are
//! serialized as exact strings. Errors map to a JSON `{error, message}`
//! body with the matching status code.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use types::bucket::BucketKind;
use types::ids::MerchantId;

use crate::query::{QueryError, TopCategory, TopCategoryQuery};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub query: Arc<TopCategoryQuery>,
}

impl AppState {
    pub fn new(query: Arc<TopCategoryQuery>) -> Self {
        Self { query }
    }
}

/// Central error type for the read API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error")]
    Internal(#[source] QueryError),
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::InvalidRange { .. } => ApiError::BadRequest(err.to_string()),
            QueryError::Store(_) => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "BAD_REQUEST"),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "INTERNAL_ERROR",
            ),
        };

        let body = Json(json!({
            "error": code,
            "message": message
        }));

        (status, body).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/top-categories", get(top_categories))
        .route("/api/top-categories/range", get(top_categories_range))
        .with_state(state)
}

fn default_limit() -> usize {
    5
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointParams {
    merchant_id: i64,
    bucket_type: String,
    /// ISO-8601 start of (or any instant inside) the bucket.
    bucket_start: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeParams {
    merchant_id: i64,
    start_date: String,
    end_date: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn parse_instant(label: &str, raw: &str) -> Result<chrono::DateTime<chrono::Utc>, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("{label} is not a valid ISO-8601 instant: {raw}")))
}

fn validate_limit(limit: usize) -> Result<usize, ApiError> {
    if limit == 0 {
        return Err(ApiError::BadRequest("limit must be at least 1".into()));
    }
    Ok(limit)
}

async fn top_categories(
    State(state): State<AppState>,
    Query(params): Query<PointParams>,
) -> Result<Json<Vec<TopCategory>>, ApiError> {
    let kind: BucketKind = params
        .bucket_type
        .parse()
        .map_err(|err: types::bucket::ParseBucketKindError| ApiError::BadRequest(err.to_string()))?;
    let bucket_start = parse_instant("bucketStart", &params.bucket_start)?;
    let limit = validate_limit(params.limit)?;

    let rows = state
        .query
        .top_categories(MerchantId::from_i64(params.merchant_id), kind, bucket_start, limit)
        .await?;
    Ok(Json(rows))
}

async fn top_categories_range(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<TopCategory>>, ApiError> {
    let start = parse_instant("startDate", &params.start_date)?;
    let end = parse_instant("endDate", &params.end_date)?;
    let limit = validate_limit(params.limit)?;

    let rows = state
        .query
        .top_categories_range(MerchantId::from_i64(params.merchant_id), start, end, limit)
        .await?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::RangeScanStore;
    use crate::buckets::BucketUpsert;
    use crate::catalog::InMemoryCatalog;
    use crate::store::{AggregateStore, InMemoryAggregateStore};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use types::ids::CategoryId;

    async fn seeded_router() -> Router {
        let point = Arc::new(InMemoryAggregateStore::new());
        let range = Arc::new(RangeScanStore::new());
        let now = "2024-01-01T12:00:00Z".parse().unwrap();
        let deltas = [BucketUpsert {
            merchant_id: MerchantId::from_i64(1),
            category_id: CategoryId::from_i64(101),
            bucket_start: "2024-01-01T00:00:00Z".parse().unwrap(),
            bucket_end: "2024-01-02T00:00:00Z".parse().unwrap(),
            amount_delta: "30.00".parse().unwrap(),
            units_delta: 3,
            order_count_delta: 1,
        }];
        point
            .upsert_additive(BucketKind::Day, &deltas, now)
            .await
            .unwrap();
        range
            .upsert_additive(BucketKind::Day, &deltas, now)
            .await
            .unwrap();

        let query = Arc::new(TopCategoryQuery::new(
            point,
            range,
            Arc::new(InMemoryCatalog::with_names([(101, "Beverages")])),
        ));
        create_router(AppState::new(query))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_point_endpoint_returns_rows() {
        let router = seeded_router().await;
        let response = router
            .oneshot(
                Request::builder()
                    .uri(
                        "/api/top-categories?merchantId=1&bucketType=DAY\
                         &bucketStart=2024-01-01T00:00:00Z&limit=5",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body[0]["categoryId"], 101);
        assert_eq!(body[0]["categoryName"], "Beverages");
        assert_eq!(body[0]["totalSalesAmount"], "30.00");
        assert_eq!(body[0]["totalUnitsSold"], 3);
        assert_eq!(body[0]["orderCount"], 1);
    }

    #[tokio::test]
    async fn test_range_endpoint_returns_rows() {
        let router = seeded_router().await;
        let response = router
            .oneshot(
                Request::builder()
                    .uri(
                        "/api/top-categories/range?merchantId=1\
                         &startDate=2024-01-01T00:00:00Z&endDate=2024-01-07T00:00:00Z",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body[0]["categoryName"], "Beverages");
    }

    #[tokio::test]
    async fn test_bad_bucket_type_is_400() {
        let router = seeded_router().await;
        let response = router
            .oneshot(
                Request::builder()
                    .uri(
                        "/api/top-categories?merchantId=1&bucketType=HOUR\
                         &bucketStart=2024-01-01T00:00:00Z",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_bad_timestamp_is_400() {
        let router = seeded_router().await;
        let response = router
            .oneshot(
                Request::builder()
                    .uri(
                        "/api/top-categories?merchantId=1&bucketType=DAY\
                         &bucketStart=yesterday",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_zero_limit_is_400() {
        let router = seeded_router().await;
        let response = router
            .oneshot(
                Request::builder()
                    .uri(
                        "/api/top-categories?merchantId=1&bucketType=DAY\
                         &bucketStart=2024-01-01T00:00:00Z&limit=0",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_inverted_range_is_400() {
        let router = seeded_router().await;
        let response = router
            .oneshot(
                Request::builder()
                    .uri(
                        "/api/top-categories/range?merchantId=1\
                         &startDate=2024-02-01T00:00:00Z&endDate=2024-01-01T00:00:00Z",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unseen_merchant_is_empty_200() {
        let router = seeded_router().await;
        let response = router
            .oneshot(
                Request::builder()
                    .uri(
                        "/api/top-categories?merchantId=42&bucketType=DAY\
                         &bucketStart=2024-01-01T00:00:00Z",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body, serde_json::json!([]));
    }
}
