//! End-to-end pipeline wiring
//!
//! Builds the whole pipeline in-process (outbox event log, publisher,
//! partitioned broker, one consumer task per partition, shared aggregator
//! over dual stores), pushes a generated order flow through it, and
//! reports what happened. Duplicate outbox rows can be injected to
//! exercise the idempotency guard under at-least-once delivery.

use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

use aggregation::aggregator::SalesAggregator;
use aggregation::analytics::RangeScanStore;
use aggregation::catalog::{CategoryCatalog, InMemoryCatalog};
use aggregation::consumer::OrderEventsConsumer;
use aggregation::dedup::InMemoryIdempotencyGuard;
use aggregation::query::{TopCategory, TopCategoryQuery};
use aggregation::store::InMemoryAggregateStore;
use aggregation::writer::AggregateWriter;
use ingestion::broker::InProcessBroker;
use ingestion::outbox::{EventKind, EventLog, InMemoryEventLog};
use ingestion::publisher::{OutboxPublisher, PublisherConfig};
use types::ids::MerchantId;
use types::order::OrderEventPayload;

use crate::generator::{OrderFlowConfig, OrderFlowGenerator};

/// Configuration for one simulation run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Order flow to generate.
    pub flow: OrderFlowConfig,
    /// Broker partitions (and consumer tasks).
    pub partitions: u32,
    /// How many of the generated orders are appended to the outbox twice,
    /// simulating duplicate delivery.
    pub duplicate_orders: usize,
    /// Maximum payloads per consumer batch.
    pub consumer_batch: usize,
    /// Rows per ranking in the final report.
    pub top_limit: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            flow: OrderFlowConfig::default(),
            partitions: 4,
            duplicate_orders: 25,
            consumer_batch: 64,
            top_limit: 5,
        }
    }
}

/// Per-merchant ranking in the run report.
#[derive(Debug, Clone)]
pub struct MerchantTop {
    pub merchant_id: MerchantId,
    pub rows: Vec<TopCategory>,
}

/// Counters and rankings from one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub orders_submitted: usize,
    pub outbox_rows: usize,
    pub published: u64,
    pub publisher_ticks: u64,
    pub batches_processed: u64,
    pub events_seen: u64,
    pub duplicates_skipped: u64,
    pub replica_failures: u64,
    pub top_categories: Vec<MerchantTop>,
}

/// A finished run plus handles into its stores for inspection.
pub struct PipelineRun {
    pub report: RunReport,
    pub point_store: Arc<InMemoryAggregateStore>,
    pub range_store: Arc<RangeScanStore>,
    pub query: Arc<TopCategoryQuery>,
    /// The orders that were generated (duplicates not repeated).
    pub orders: Vec<OrderEventPayload>,
}

/// Run the full pipeline over a generated order flow.
pub async fn run(config: RunConfig) -> anyhow::Result<PipelineRun> {
    let orders = OrderFlowGenerator::new(config.flow.clone()).generate();
    info!(
        orders = orders.len(),
        duplicates = config.duplicate_orders,
        partitions = config.partitions,
        "Simulation run starting"
    );

    // Intake: every order becomes an outbox row; the first N orders get a
    // second row with the same business key.
    let log = Arc::new(InMemoryEventLog::new());
    for order in &orders {
        append_order(log.as_ref(), order)?;
    }
    for order in orders.iter().take(config.duplicate_orders) {
        append_order(log.as_ref(), order)?;
    }
    let outbox_rows = log.len()?;

    // Consumer side: shared aggregator over dual stores, one consumer task
    // per partition so partition batches process strictly in sequence.
    let (broker, partition_consumers) = InProcessBroker::new(config.partitions, 1024);
    let guard = Arc::new(InMemoryIdempotencyGuard::new());
    let point_store = Arc::new(InMemoryAggregateStore::new());
    let range_store = Arc::new(RangeScanStore::new());
    let writer = AggregateWriter::new(point_store.clone()).with_replica(range_store.clone());
    let aggregator = Arc::new(SalesAggregator::new(guard, writer));

    let consumer_batch = config.consumer_batch;
    let mut handles = Vec::new();
    for mut partition in partition_consumers {
        let aggregator = aggregator.clone();
        handles.push(tokio::spawn(async move {
            let mut consumer = OrderEventsConsumer::new(aggregator);
            while let Some(batch) = partition.recv_batch(consumer_batch).await {
                if let Err(err) = consumer.process_batch(&batch, Utc::now()).await {
                    error!(
                        partition = partition.partition(),
                        error = %err,
                        "Batch processing failed"
                    );
                }
            }
            (
                consumer.batches_processed(),
                consumer.events_seen(),
                consumer.duplicates_skipped(),
            )
        }));
    }

    // Publisher: tick until the outbox drains.
    let mut publisher = OutboxPublisher::new(
        log.clone(),
        broker.clone(),
        PublisherConfig {
            batch_size: 256,
            ..PublisherConfig::default()
        },
    );
    while !log.list_undelivered(1)?.is_empty() {
        let tick = publisher.publish_batch(Utc::now()).await?;
        if tick.published == 0 {
            anyhow::bail!("pipeline stalled: broker stopped accepting sends");
        }
    }
    let published = publisher.published();
    let publisher_ticks = publisher.ticks();

    // Close the broker so consumers drain and finish.
    drop(publisher);
    drop(broker);

    let mut batches_processed = 0;
    let mut events_seen = 0;
    let mut duplicates_skipped = 0;
    for handle in handles {
        let (batches, events, duplicates) =
            handle.await.context("consumer task panicked")?;
        batches_processed += batches;
        events_seen += events;
        duplicates_skipped += duplicates;
    }
    let replica_failures = aggregator.writer().replica_failures();

    // Report: per-merchant top categories over the whole generated window.
    let catalog: Arc<dyn CategoryCatalog> = Arc::new(InMemoryCatalog::with_names(
        config.flow.categories.iter().map(|id| (*id, format!("Category {id}"))),
    ));
    let query = Arc::new(TopCategoryQuery::new(
        point_store.clone(),
        range_store.clone(),
        catalog,
    ));

    let window_end = config.flow.start + config.flow.span;
    let mut top_categories = Vec::new();
    for merchant in 1..=config.flow.merchants {
        let merchant_id = MerchantId::from_i64(merchant);
        let rows = query
            .top_categories_range(merchant_id, config.flow.start, window_end, config.top_limit)
            .await?;
        top_categories.push(MerchantTop { merchant_id, rows });
    }

    let report = RunReport {
        orders_submitted: orders.len(),
        outbox_rows,
        published,
        publisher_ticks,
        batches_processed,
        events_seen,
        duplicates_skipped,
        replica_failures,
        top_categories,
    };
    info!(
        published = report.published,
        batches = report.batches_processed,
        duplicates_skipped = report.duplicates_skipped,
        "Simulation run finished"
    );

    Ok(PipelineRun {
        report,
        point_store,
        range_store,
        query,
        orders,
    })
}

fn append_order(log: &dyn EventLog, order: &OrderEventPayload) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(order).context("serialize order payload")?;
    log.append(
        order.order_id,
        order.merchant_id,
        EventKind::OrderCreated,
        payload,
        order.order_date,
    )?;
    Ok(())
}
