//! Outbox publisher
//!
//! Fixed-delay loop that drains undelivered outbox rows to the broker.
//! Each tick scans up to `batch_size` rows oldest-first, sends them one at
//! a time under a bounded ack wait, and marks a row delivered only after
//! the broker confirms receipt. A failed or timed-out send stops the tick:
//! later rows must not overtake earlier ones, so a broker outage simply
//! stalls delivery while rows accumulate. Nothing is ever marked
//! speculatively, which makes delivery at-least-once; the consumer side
//! deduplicates.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::broker::Broker;
use crate::outbox::{EventLog, OutboxError};

/// Configuration for the outbox publisher.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Broker topic to publish to.
    pub topic: String,
    /// Maximum rows scanned per tick.
    pub batch_size: usize,
    /// Delay between the end of one tick and the start of the next.
    pub tick_interval: Duration,
    /// Bound on the wait for a broker acknowledgment.
    pub ack_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: "order-events".to_string(),
            batch_size: 100,
            tick_interval: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(10),
        }
    }
}

impl PublisherConfig {
    /// Defaults overridden from the environment where set:
    /// `OUTBOX_TOPIC`, `OUTBOX_BATCH_SIZE`, `OUTBOX_TICK_MS`,
    /// `OUTBOX_ACK_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(topic) = std::env::var("OUTBOX_TOPIC") {
            config.topic = topic;
        }
        if let Some(size) = env_parse::<usize>("OUTBOX_BATCH_SIZE") {
            config.batch_size = size;
        }
        if let Some(ms) = env_parse::<u64>("OUTBOX_TICK_MS") {
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("OUTBOX_ACK_TIMEOUT_MS") {
            config.ack_timeout = Duration::from_millis(ms);
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

/// What one publisher tick accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishReport {
    /// Undelivered rows scanned this tick.
    pub scanned: usize,
    /// Rows delivered and marked this tick.
    pub published: usize,
    /// Sends that failed or timed out (at most 1; a failure stops the tick).
    pub failed: usize,
}

/// Periodic publisher draining the outbox event log to the broker.
pub struct OutboxPublisher {
    log: Arc<dyn EventLog>,
    broker: Arc<dyn Broker>,
    config: PublisherConfig,
    ticks: u64,
    published: u64,
    failed: u64,
}

impl OutboxPublisher {
    pub fn new(
        log: Arc<dyn EventLog>,
        broker: Arc<dyn Broker>,
        config: PublisherConfig,
    ) -> Self {
        info!(
            topic = %config.topic,
            batch_size = config.batch_size,
            tick_ms = config.tick_interval.as_millis() as u64,
            ack_timeout_ms = config.ack_timeout.as_millis() as u64,
            "OutboxPublisher initialized"
        );
        Self {
            log,
            broker,
            config,
            ticks: 0,
            published: 0,
            failed: 0,
        }
    }

    /// One publisher tick.
    ///
    /// `now` stamps `delivered_at`; callers (the run loop, or tests driving
    /// ticks directly) supply it so the tick itself is clock-free.
    pub async fn publish_batch(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<PublishReport, OutboxError> {
        self.ticks += 1;
        let events = self.log.list_undelivered(self.config.batch_size)?;
        debug!(
            scanned = events.len(),
            batch_size = self.config.batch_size,
            "Outbox publisher tick"
        );

        let mut report = PublishReport {
            scanned: events.len(),
            ..PublishReport::default()
        };

        for event in events {
            let send = self
                .broker
                .send(&self.config.topic, event.order_id, &event.payload);

            match timeout(self.config.ack_timeout, send).await {
                Ok(Ok(ack)) => {
                    // Only mark delivered AFTER the broker confirms receipt.
                    self.log.mark_delivered(event.id, now)?;
                    info!(
                        event_id = %event.id,
                        order_id = %event.order_id,
                        partition = ack.partition,
                        offset = ack.offset,
                        "Published outbox event"
                    );
                    report.published += 1;
                    self.published += 1;
                }
                Ok(Err(err)) => {
                    // Leave undelivered; retried on the next tick. Stop the
                    // tick so later rows cannot overtake this one.
                    error!(
                        event_id = %event.id,
                        error = %err,
                        "Failed to publish outbox event, will retry"
                    );
                    report.failed += 1;
                    self.failed += 1;
                    break;
                }
                Err(_elapsed) => {
                    error!(
                        event_id = %event.id,
                        timeout_ms = self.config.ack_timeout.as_millis() as u64,
                        "Broker ack timed out, will retry"
                    );
                    report.failed += 1;
                    self.failed += 1;
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Fixed-delay publish loop. Ticks never overlap: the delay starts
    /// only after the previous tick finishes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Outbox publisher started");
        loop {
            if let Err(err) = self.publish_batch(Utc::now()).await {
                error!(error = %err, "Publisher tick failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval) => {}
                _ = shutdown.changed() => {
                    info!(
                        ticks = self.ticks,
                        published = self.published,
                        "Outbox publisher stopping"
                    );
                    break;
                }
            }
        }
    }

    /// Ticks executed since creation.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Events delivered and marked since creation.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Sends that failed or timed out since creation.
    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }
}
