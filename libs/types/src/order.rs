//! Order event wire payload
//!
//! The message published to the broker for every recorded order. Immutable
//! once produced; `line_amount` uses `Decimal` so monetary values survive
//! serialization exactly (amounts travel as JSON strings, never floats).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{CategoryId, MerchantId, OrderId};

/// A single order line: one category, a unit count, and the exact amount
/// charged for the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub category_id: CategoryId,
    pub quantity: u32,
    pub line_amount: Decimal,
}

/// Event payload published for every recorded order.
///
/// `order_id` is the business key: it partitions broker delivery and gates
/// consumer-side deduplication. `correlation_id` ties the payload back to
/// the intake request for tracing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEventPayload {
    pub order_id: OrderId,
    pub merchant_id: MerchantId,
    pub order_date: DateTime<Utc>,
    pub items: Vec<OrderLine>,
    /// Correlation ID for request tracing (UUID v7)
    pub correlation_id: Uuid,
}

impl OrderEventPayload {
    /// Sum of all line amounts.
    pub fn total_amount(&self) -> Decimal {
        self.items.iter().map(|line| line.line_amount).sum()
    }

    /// Sum of all line quantities.
    pub fn total_units(&self) -> u64 {
        self.items.iter().map(|line| u64::from(line.quantity)).sum()
    }
}
