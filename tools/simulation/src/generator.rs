//! Seeded order-flow generator
//!
//! Produces a deterministic stream of order events for a pool of merchants
//! and categories, with timestamps jittered across the configured span so
//! flows cross day, week, and month boundaries. Line amounts are derived
//! from integer cents, never floats.

use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use types::ids::{CategoryId, MerchantId, OrderId};
use types::order::{OrderEventPayload, OrderLine};
use uuid::Uuid;

/// Configuration for the order-flow generator.
#[derive(Debug, Clone)]
pub struct OrderFlowConfig {
    /// Deterministic seed.
    pub seed: u64,
    /// Number of orders to generate.
    pub orders: usize,
    /// Merchant pool size (ids 1..=merchants).
    pub merchants: i64,
    /// Category id pool.
    pub categories: Vec<i64>,
    /// Maximum lines per order.
    pub max_lines: usize,
    /// Maximum quantity per line.
    pub max_quantity: u32,
    /// Unit price range in cents, inclusive.
    pub unit_price_cents: (i64, i64),
    /// Earliest order timestamp.
    pub start: DateTime<Utc>,
    /// Width of the timestamp window.
    pub span: Duration,
}

impl Default for OrderFlowConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            orders: 1_000,
            merchants: 3,
            categories: (101..=110).collect(),
            max_lines: 4,
            max_quantity: 8,
            unit_price_cents: (50, 50_00),
            start: DateTime::<Utc>::from_timestamp(1_704_067_200, 0)
                .expect("2024-01-01T00:00:00Z is representable"),
            span: Duration::days(45),
        }
    }
}

/// Deterministic order-flow generator.
pub struct OrderFlowGenerator {
    config: OrderFlowConfig,
    rng: ChaCha8Rng,
    next_order_id: i64,
}

impl OrderFlowGenerator {
    pub fn new(config: OrderFlowConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            next_order_id: 1,
        }
    }

    /// Generate the configured number of orders.
    pub fn generate(&mut self) -> Vec<OrderEventPayload> {
        (0..self.config.orders).map(|_| self.next_order()).collect()
    }

    /// Generate one order.
    pub fn next_order(&mut self) -> OrderEventPayload {
        let order_id = OrderId::from_i64(self.next_order_id);
        self.next_order_id += 1;

        let merchant_id =
            MerchantId::from_i64(self.rng.gen_range(1..=self.config.merchants));
        let offset_secs = self
            .rng
            .gen_range(0..self.config.span.num_seconds().max(1));
        let order_date = self.config.start + Duration::seconds(offset_secs);

        let lines = self.rng.gen_range(1..=self.config.max_lines);
        let items = (0..lines).map(|_| self.next_line()).collect();

        OrderEventPayload {
            order_id,
            merchant_id,
            order_date,
            items,
            correlation_id: Uuid::now_v7(),
        }
    }

    fn next_line(&mut self) -> OrderLine {
        let category = self.config.categories
            [self.rng.gen_range(0..self.config.categories.len())];
        let quantity = self.rng.gen_range(1..=self.config.max_quantity);
        let (lo, hi) = self.config.unit_price_cents;
        let unit_cents = self.rng.gen_range(lo..=hi);
        // line amount = quantity * unit price, exact in cents
        let line_amount = Decimal::new(unit_cents * i64::from(quantity), 2);
        OrderLine {
            category_id: CategoryId::from_i64(category),
            quantity,
            line_amount,
        }
    }
}
