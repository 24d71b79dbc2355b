use crate::calculator::TimeToCloseCalculator;
use crate::carto_client::{latest_requested, CartoClient, DeltaQuery};
use crate::data_loader::{write_snapshot, DataLoader};
use crate::models::{ServiceRequestRecord, SyncConfig, SyncSummary, UpsertStats};
use crate::upsert::upsert;
use crate::zip_mapper::ZipAreaMapper;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::info;
use std::time::Duration;

/// Result of the in-memory part of a sync.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub records: Vec<ServiceRequestRecord>,
    pub upsert: UpsertStats,
    pub dropped_invalid_zip: usize,
}

/// Upsert the fetched batch, recompute `time_to_close` as of `now`, and,
/// given a mapper, label areas and drop rows with known-bad zips.
pub fn reconcile(
    mut snapshot: Vec<ServiceRequestRecord>,
    fetched: &[ServiceRequestRecord],
    mapper: Option<&ZipAreaMapper>,
    now: DateTime<Utc>,
) -> Reconciled {
    let upsert_stats = upsert(&mut snapshot, fetched);
    info!(
        "Upsert: {} backfilled, {} appended, {} already known",
        upsert_stats.backfilled, upsert_stats.appended, upsert_stats.ignored
    );

    TimeToCloseCalculator::new(now).apply(&mut snapshot);

    let dropped = match mapper {
        Some(mapper) => {
            let dropped = mapper.enrich(&mut snapshot);
            info!("Area enrichment dropped {} rows with invalid zipcodes", dropped);
            dropped
        }
        None => 0,
    };

    Reconciled {
        records: snapshot,
        upsert: upsert_stats,
        dropped_invalid_zip: dropped,
    }
}

/// One full run: load, fetch, reconcile, write. The output file is only
/// touched after every earlier step has succeeded.
pub struct SyncPipeline {
    config: SyncConfig,
    loader: DataLoader,
    carto: CartoClient,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let loader = DataLoader::new(timeout)?;
        let carto = CartoClient::new(&config.api_endpoint, timeout)?;
        Ok(Self {
            config,
            loader,
            carto,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<SyncSummary> {
        let config = &self.config;
        info!("Starting graffiti snapshot sync");

        let snapshot = self.loader.load_snapshot(&config.snapshot_source).await?;
        let snapshot_rows = snapshot.len();

        let latest = latest_requested(&snapshot);
        match latest {
            Some(latest) => info!("Latest requested_datetime in snapshot: {}", latest),
            None => info!("Snapshot has no requests yet; fetching everything"),
        }

        let query = DeltaQuery::new(&config.table, &config.subject, latest)?;
        let fetched = self.carto.fetch_delta(&query).await?;

        let mapper = if config.enrich_areas {
            Some(
                ZipAreaMapper::from_source(
                    &self.loader,
                    &config.reference_source,
                    &config.invalid_zipcodes,
                )
                .await?,
            )
        } else {
            None
        };

        let reconciled = reconcile(snapshot, &fetched, mapper.as_ref(), now);

        let written = if config.dry_run {
            info!("Dry run: leaving {:?} untouched", config.output_path);
            false
        } else {
            write_snapshot(&config.output_path, &reconciled.records)?;
            true
        };

        Ok(SyncSummary {
            run_at: now,
            snapshot_rows,
            latest_requested: latest,
            fetched_rows: fetched.len(),
            upsert: reconciled.upsert,
            dropped_invalid_zip: reconciled.dropped_invalid_zip,
            final_rows: reconciled.records.len(),
            output_path: config.output_path.clone(),
            written,
        })
    }
}
