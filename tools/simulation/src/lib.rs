//! Order-Flow Simulation Harness
//!
//! Drives the full analytics pipeline in-process: a seeded generator
//! produces order flow, the outbox publisher drains it to the in-process
//! broker, per-partition consumers aggregate it, and the top-category
//! query reports the result. Deterministic for a given seed, so runs are
//! comparable across machines.
//!
//! # Modules
//! - `generator` — Seeded order-flow generator
//! - `runner` — End-to-end pipeline wiring and run report

pub mod generator;
pub mod runner;

/// Crate version constant
pub const VERSION: &str = "1.0.0";
