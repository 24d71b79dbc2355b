use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::lenient;

pub const STATUS_OPEN: &str = "Open";
pub const STATUS_CLOSED: &str = "Closed";
pub const AREA_NOT_APPLICABLE: &str = "Not Applicable";

/// Column order of the published snapshot. The web viewer indexes columns
/// positionally, so writers must keep this order.
pub const SNAPSHOT_COLUMNS: [&str; 16] = [
    "cartodb_id",
    "objectid",
    "service_request_id",
    "status",
    "status_notes",
    "requested_datetime",
    "updated_datetime",
    "expected_datetime",
    "closed_datetime",
    "address",
    "zipcode",
    "media_url",
    "lat",
    "lon",
    "time_to_close",
    "area",
];

/// One graffiti-removal service request, as stored in the snapshot and as
/// returned by the Carto SQL API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequestRecord {
    #[serde(deserialize_with = "lenient::id")]
    pub cartodb_id: i64,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub objectid: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub service_request_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub status: String,
    #[serde(default)]
    pub status_notes: Option<String>,
    #[serde(default, with = "lenient::opt_utc")]
    pub requested_datetime: Option<DateTime<Utc>>,
    #[serde(default, with = "lenient::opt_utc")]
    pub updated_datetime: Option<DateTime<Utc>>,
    #[serde(default, with = "lenient::opt_utc")]
    pub expected_datetime: Option<DateTime<Utc>>,
    #[serde(default, with = "lenient::opt_utc")]
    pub closed_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub zipcode: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub lon: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub time_to_close: Option<i64>,
    #[serde(default)]
    pub area: Option<String>,
}

impl ServiceRequestRecord {
    /// Bare record carrying only the fields the sync logic looks at.
    pub fn new(cartodb_id: i64, status: &str, requested_datetime: Option<DateTime<Utc>>) -> Self {
        Self {
            cartodb_id,
            objectid: None,
            service_request_id: None,
            status: status.to_string(),
            status_notes: None,
            requested_datetime,
            updated_datetime: None,
            expected_datetime: None,
            closed_datetime: None,
            address: None,
            zipcode: None,
            media_url: None,
            lat: None,
            lon: None,
            time_to_close: None,
            area: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == STATUS_OPEN
    }

    pub fn is_closed(&self) -> bool {
        self.status == STATUS_CLOSED
    }

    /// Open on paper but never given a close time: the rows a later fetch may backfill.
    pub fn awaiting_close(&self) -> bool {
        self.is_open() && self.closed_datetime.is_none()
    }
}

/// Everything one sync run needs to know. Defaults are the production
/// endpoints the published snapshot is built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub snapshot_source: String,
    pub reference_source: String,
    pub output_path: PathBuf,
    pub api_endpoint: String,
    pub table: String,
    pub subject: String,
    pub enrich_areas: bool,
    pub invalid_zipcodes: Vec<String>,
    pub request_timeout_secs: u64,
    pub dry_run: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snapshot_source: "https://raw.githubusercontent.com/jeisey/phiti/main/graffiti.csv"
                .to_string(),
            reference_source: "https://raw.githubusercontent.com/jeisey/phiti/main/ref_ziparea.csv"
                .to_string(),
            output_path: PathBuf::from("graffiti.csv"),
            api_endpoint: "https://phl.carto.com/api/v2/sql".to_string(),
            table: "public_cases_fc".to_string(),
            subject: "Graffiti Removal".to_string(),
            enrich_areas: true,
            invalid_zipcodes: default_invalid_zipcodes(),
            request_timeout_secs: 60,
            dry_run: false,
        }
    }
}

pub fn default_invalid_zipcodes() -> Vec<String> {
    ["0", "00000", "99999", "nan"]
        .iter()
        .map(|z| z.to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertStats {
    pub backfilled: usize,
    pub appended: usize,
    pub ignored: usize,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSummary {
    pub run_at: DateTime<Utc>,
    pub snapshot_rows: usize,
    pub latest_requested: Option<DateTime<Utc>>,
    pub fetched_rows: usize,
    pub upsert: UpsertStats,
    pub dropped_invalid_zip: usize,
    pub final_rows: usize,
    pub output_path: PathBuf,
    pub written: bool,
}
