use simulation::runner::{run, RunConfig};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    tracing::info!(version = simulation::VERSION, "Starting order-flow simulation");

    let outcome = run(RunConfig::default()).await?;
    let report = &outcome.report;

    println!("── Simulation report ──────────────────────────────");
    println!("orders submitted:    {}", report.orders_submitted);
    println!("outbox rows:         {}", report.outbox_rows);
    println!("published:           {}", report.published);
    println!("publisher ticks:     {}", report.publisher_ticks);
    println!("batches processed:   {}", report.batches_processed);
    println!("events seen:         {}", report.events_seen);
    println!("duplicates skipped:  {}", report.duplicates_skipped);
    println!("replica write gaps:  {}", report.replica_failures);

    for merchant in &report.top_categories {
        println!("\ntop categories for merchant {}:", merchant.merchant_id);
        for (rank, row) in merchant.rows.iter().enumerate() {
            println!(
                "  {}. {} — sales {} ({} units, {} line orders)",
                rank + 1,
                row.category_name,
                row.total_sales_amount,
                row.total_units_sold,
                row.order_count
            );
        }
    }

    Ok(())
}
