//! Ingestion Service — the write side of the order analytics pipeline
//!
//! Orders recorded by the intake path land as rows in a durable outbox
//! event log. A periodic publisher drains undelivered rows to the broker
//! in FIFO order and marks them delivered only after the broker
//! acknowledges receipt, giving at-least-once delivery without ever losing
//! the source-of-truth record.
//!
//! # Modules
//! - `outbox`: outbox event rows and the `EventLog` contract
//! - `journal`: file-backed append-only event log with checksums
//! - `broker`: broker seam and the in-process partitioned broker
//! - `publisher`: the fixed-delay outbox publisher

pub mod broker;
pub mod journal;
pub mod outbox;
pub mod publisher;

/// Service version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
