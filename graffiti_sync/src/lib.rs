pub mod calculator;
pub mod carto_client;
pub mod data_loader;
pub mod lenient;
pub mod models;
pub mod pipeline;
pub mod upsert;
pub mod zip_mapper;

pub use calculator::TimeToCloseCalculator;
pub use carto_client::{CartoClient, DeltaQuery};
pub use data_loader::DataLoader;
pub use models::{ServiceRequestRecord, SyncConfig, SyncSummary, UpsertStats};
pub use pipeline::{reconcile, Reconciled, SyncPipeline};
pub use upsert::upsert;
pub use zip_mapper::ZipAreaMapper;
