use anyhow::Result;
use chrono::Utc;
use graffiti_sync::{SyncConfig, SyncPipeline};
use std::path::PathBuf;

mod snapshot_report;
mod snapshot_verifier;

fn run_sync() -> Result<()> {
    println!("🚀 Graffiti Removal Snapshot Sync");
    println!("{}", "=".repeat(60));

    let config = SyncConfig::default();
    println!("Snapshot:  {}", config.snapshot_source);
    println!("Reference: {}", config.reference_source);
    println!("Endpoint:  {}", config.api_endpoint);

    let start = std::time::Instant::now();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let summary = runtime.block_on(async {
        let pipeline = SyncPipeline::new(config)?;
        pipeline.run(Utc::now()).await
    })?;

    println!("\nFetched {} rows from the API", summary.fetched_rows);
    println!("  {} close times backfilled", summary.upsert.backfilled);
    println!("  {} new requests appended", summary.upsert.appended);
    println!("  {} rows dropped for invalid zipcodes", summary.dropped_invalid_zip);
    println!(
        "\n✅ Wrote {} rows to {:?} in {:?}",
        summary.final_rows,
        summary.output_path,
        start.elapsed()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get())
        .build_global()?;

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "--verify" {
        // Audit snapshot files for broken invariants
        let pattern = args.get(2).map(String::as_str).unwrap_or("*.csv");
        snapshot_verifier::verify_snapshots(pattern)?;
    } else if args.len() > 1 && args[1] == "--report" {
        // Viewer-style totals plus a per-area breakdown
        let path = args
            .get(2)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("graffiti.csv"));
        snapshot_report::generate_report(&path)?;
    } else if args.len() <= 1 || args[1] == "--sync" {
        run_sync()?;
    } else {
        println!("Usage: phl_graffiti_pipeline [--sync | --verify [glob] | --report [snapshot.csv]]");
        println!("For configurable runs use the graffiti_sync binary (graffiti_sync --help)");
        anyhow::bail!("Unknown option {}", args[1]);
    }

    Ok(())
}
