use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use graffiti_sync::lenient::parse_utc;
use graffiti_sync::{SyncConfig, SyncPipeline, SyncSummary};
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "graffiti_sync")]
#[command(about = "Sync the graffiti-removal snapshot with the Philadelphia Carto API")]
struct Args {
    /// Existing snapshot (local path or URL)
    #[arg(long)]
    snapshot: Option<String>,

    /// Zip → district reference table (local path or URL)
    #[arg(long)]
    reference: Option<String>,

    /// Where to write the updated snapshot
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Carto SQL API endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// Request subject to sync
    #[arg(long)]
    subject: Option<String>,

    /// Skip the zip → area join
    #[arg(long)]
    no_areas: bool,

    /// Extra zipcodes to treat as invalid (repeatable)
    #[arg(long = "invalid-zip")]
    invalid_zips: Vec<String>,

    /// HTTP timeout in seconds
    #[arg(long, default_value = "60")]
    timeout: u64,

    /// Evaluate open requests as of this time instead of now
    #[arg(long)]
    as_of: Option<String>,

    /// Do everything except write the output
    #[arg(long)]
    dry_run: bool,

    /// Summary format
    #[arg(short, long, value_enum, default_value = "summary")]
    format: OutputFormat,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Summary,
}

impl Args {
    fn into_config(self) -> SyncConfig {
        let mut config = SyncConfig::default();
        if let Some(snapshot) = self.snapshot {
            config.snapshot_source = snapshot;
        }
        if let Some(reference) = self.reference {
            config.reference_source = reference;
        }
        if let Some(output) = self.output {
            config.output_path = output;
        }
        if let Some(endpoint) = self.endpoint {
            config.api_endpoint = endpoint;
        }
        if let Some(subject) = self.subject {
            config.subject = subject;
        }
        config.enrich_areas = !self.no_areas;
        config.invalid_zipcodes.extend(self.invalid_zips);
        config.request_timeout_secs = self.timeout;
        config.dry_run = self.dry_run;
        config
    }
}

fn print_summary(summary: &SyncSummary) {
    println!("Graffiti Snapshot Sync");
    println!("======================");
    println!("Run at: {}", summary.run_at);
    match summary.latest_requested {
        Some(latest) => println!("Snapshot: {} rows, latest request {}", summary.snapshot_rows, latest),
        None => println!("Snapshot: {} rows", summary.snapshot_rows),
    }
    println!("Fetched: {} rows", summary.fetched_rows);
    println!("  Backfilled close times: {}", summary.upsert.backfilled);
    println!("  Appended new requests:  {}", summary.upsert.appended);
    println!("  Already known:          {}", summary.upsert.ignored);
    println!("Dropped (invalid zip): {}", summary.dropped_invalid_zip);
    println!("Final rows: {}", summary.final_rows);
    if summary.written {
        println!("Wrote {:?}", summary.output_path);
    } else {
        println!("Dry run, {:?} not written", summary.output_path);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let now: DateTime<Utc> = match &args.as_of {
        Some(raw) => parse_utc(raw).ok_or_else(|| anyhow::anyhow!("Invalid --as-of time '{}'", raw))?,
        None => Utc::now(),
    };
    let format = args.format.clone();
    let config = args.into_config();

    info!("Syncing {} into {:?}", config.snapshot_source, config.output_path);
    let pipeline = SyncPipeline::new(config)?;
    let summary = pipeline.run(now).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Summary => print_summary(&summary),
    }

    Ok(())
}
