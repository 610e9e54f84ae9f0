//! Outbox event log
//!
//! Durable, append-only record of domain events awaiting broker delivery.
//! Rows are created once by the intake path, mutated only by the publisher
//! (to flip `delivered`), and never deleted here; retention is an external
//! concern. Undelivered rows are always scanned in creation order so the
//! publisher observes strict FIFO.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;
use types::ids::{EventId, MerchantId, OrderId};

/// Errors from event log operations.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("unknown outbox event: {0}")]
    UnknownEvent(EventId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal corruption: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Kind of domain event recorded in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    OrderCreated,
}

impl EventKind {
    /// Label used in logs and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrderCreated => "ORDER_CREATED",
        }
    }
}

/// One outbox row: a domain event awaiting (or past) broker delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Monotonic id assigned by the log; ascending id = creation order.
    pub id: EventId,
    /// Business key; also the broker partition key.
    pub order_id: OrderId,
    pub merchant_id: MerchantId,
    pub kind: EventKind,
    /// Opaque serialized payload forwarded verbatim to the broker.
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// The event log contract between intake, storage, and the publisher.
///
/// Implementations use interior mutability; the publisher shares the log
/// behind an `Arc`.
pub trait EventLog: Send + Sync {
    /// Append a new undelivered event, assigning the next monotonic id.
    fn append(
        &self,
        order_id: OrderId,
        merchant_id: MerchantId,
        kind: EventKind,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
    ) -> Result<OutboxEvent, OutboxError>;

    /// Up to `limit` undelivered events, oldest first (FIFO by creation).
    fn list_undelivered(&self, limit: usize) -> Result<Vec<OutboxEvent>, OutboxError>;

    /// Mark one event delivered. The only mutation rows ever see.
    fn mark_delivered(&self, id: EventId, delivered_at: DateTime<Utc>)
        -> Result<(), OutboxError>;

    /// Total rows in the log (delivered or not).
    fn len(&self) -> Result<usize, OutboxError>;

    /// Whether the log holds no rows at all.
    fn is_empty(&self) -> Result<bool, OutboxError> {
        Ok(self.len()? == 0)
    }
}

// ── In-memory event log ─────────────────────────────────────────────

#[derive(Debug, Default)]
struct LogState {
    events: Vec<OutboxEvent>,
    next_id: u64,
}

/// Event log backed by process memory.
///
/// Used by tests and the simulation runner; the durable counterpart is
/// [`crate::journal::JournalEventLog`].
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    state: Mutex<LogState>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every row in creation order (delivered or not).
    pub fn snapshot(&self) -> Vec<OutboxEvent> {
        self.state.lock().expect("outbox lock poisoned").events.clone()
    }
}

impl EventLog for InMemoryEventLog {
    fn append(
        &self,
        order_id: OrderId,
        merchant_id: MerchantId,
        kind: EventKind,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
    ) -> Result<OutboxEvent, OutboxError> {
        let mut state = self.state.lock().expect("outbox lock poisoned");
        let event = OutboxEvent {
            id: EventId::from_u64(state.next_id),
            order_id,
            merchant_id,
            kind,
            payload,
            created_at,
            delivered: false,
            delivered_at: None,
        };
        state.next_id += 1;
        state.events.push(event.clone());
        debug!(event_id = %event.id, order_id = %order_id, "Outbox event appended");
        Ok(event)
    }

    fn list_undelivered(&self, limit: usize) -> Result<Vec<OutboxEvent>, OutboxError> {
        let state = self.state.lock().expect("outbox lock poisoned");
        // events is in creation order already
        Ok(state
            .events
            .iter()
            .filter(|e| !e.delivered)
            .take(limit)
            .cloned()
            .collect())
    }

    fn mark_delivered(
        &self,
        id: EventId,
        delivered_at: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        let mut state = self.state.lock().expect("outbox lock poisoned");
        let event = state
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(OutboxError::UnknownEvent(id))?;
        event.delivered = true;
        event.delivered_at = Some(delivered_at);
        Ok(())
    }

    fn len(&self) -> Result<usize, OutboxError> {
        Ok(self.state.lock().expect("outbox lock poisoned").events.len())
    }
}
