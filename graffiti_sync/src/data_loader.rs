use crate::models::{ServiceRequestRecord, SNAPSHOT_COLUMNS};
use anyhow::{Context, Result};
use log::{debug, info};
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Reads snapshots and reference tables from disk or over HTTP, and writes
/// the snapshot back out.
pub struct DataLoader {
    client: reqwest::Client,
}

impl DataLoader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Raw bytes of a local path or an `http(s)://` URL.
    pub async fn read_source(&self, source: &str) -> Result<Vec<u8>> {
        if is_remote(source) {
            debug!("Downloading {}", source);
            let resp = self
                .client
                .get(source)
                .send()
                .await
                .with_context(|| format!("Failed to download {}", source))?;

            let status = resp.status();
            if !status.is_success() {
                anyhow::bail!("Download of {} failed with status {}", source, status.as_u16());
            }

            let bytes = resp
                .bytes()
                .await
                .with_context(|| format!("Failed to read body of {}", source))?;
            Ok(bytes.to_vec())
        } else {
            std::fs::read(source).with_context(|| format!("Failed to read {}", source))
        }
    }

    /// Load the current snapshot. A malformed row aborts the load.
    pub async fn load_snapshot(&self, source: &str) -> Result<Vec<ServiceRequestRecord>> {
        let bytes = self.read_source(source).await?;
        let records = parse_snapshot(bytes)
            .with_context(|| format!("Failed to parse snapshot {}", source))?;
        info!("Loaded {} snapshot rows from {}", records.len(), source);
        Ok(records)
    }
}

pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// UTF-8 when the bytes are valid UTF-8, latin-1 otherwise. Files this tool
/// wrote are UTF-8; older exports carry stray latin-1 bytes in free text.
pub fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            debug!("Input is not valid UTF-8, decoding as latin-1");
            err.into_bytes().iter().map(|&b| b as char).collect()
        }
    }
}

pub fn parse_snapshot(bytes: Vec<u8>) -> Result<Vec<ServiceRequestRecord>> {
    let text = decode_text(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for (idx, row) in reader.deserialize::<ServiceRequestRecord>().enumerate() {
        // +2: one for the header, one for 1-based line numbers
        let record = row.with_context(|| format!("Malformed snapshot row at line {}", idx + 2))?;
        records.push(record);
    }

    Ok(records)
}

#[cfg(unix)]
fn default_permissions() -> Option<std::fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions() -> Option<std::fs::Permissions> {
    None
}

/// Write the snapshot with a header row and no index column. The file is
/// staged next to `path` and renamed into place, so an error leaves the
/// previous snapshot as it was.
pub fn write_snapshot(path: &Path, records: &[ServiceRequestRecord]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {:?}", dir))?;

    let mut staged = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to stage snapshot in {:?}", dir))?;

    {
        let mut writer = csv::Writer::from_writer(staged.as_file_mut());
        if records.is_empty() {
            writer.write_record(SNAPSHOT_COLUMNS)?;
        }
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
    }

    // Staged files start owner-only; keep the published snapshot's mode
    let permissions = match std::fs::metadata(path) {
        Ok(meta) => Some(meta.permissions()),
        Err(_) => default_permissions(),
    };
    if let Some(permissions) = permissions {
        staged
            .as_file()
            .set_permissions(permissions)
            .with_context(|| format!("Failed to set permissions on staged snapshot for {:?}", path))?;
    }

    staged
        .persist(path)
        .with_context(|| format!("Failed to replace snapshot {:?}", path))?;

    info!("Wrote {} rows to {:?}", records.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::STATUS_OPEN;
    use chrono::{TimeZone, Utc};

    const HEADER: &str = "cartodb_id,objectid,service_request_id,status,status_notes,requested_datetime,updated_datetime,expected_datetime,closed_datetime,address,zipcode,media_url,lat,lon,time_to_close,area\n";

    #[test]
    fn test_parse_snapshot_row() {
        let csv = format!(
            "{}7,70,15551234,Open,,2024-01-01 09:00:00+00:00,,,,1500 MARKET ST,19102,https://img/7.jpg,39.95,-75.16,3,Center City\n",
            HEADER
        );
        let records = parse_snapshot(csv.into_bytes()).unwrap();

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.cartodb_id, 7);
        assert_eq!(r.service_request_id, Some(15551234));
        assert_eq!(r.status, STATUS_OPEN);
        assert_eq!(r.status_notes, None);
        assert_eq!(
            r.requested_datetime,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap())
        );
        assert_eq!(r.closed_datetime, None);
        assert_eq!(r.zipcode.as_deref(), Some("19102"));
        assert_eq!(r.lat, Some(39.95));
        assert_eq!(r.time_to_close, Some(3));
        assert_eq!(r.area.as_deref(), Some("Center City"));
    }

    #[test]
    fn test_parse_tolerates_missing_optional_columns() {
        let csv = "cartodb_id,status,requested_datetime,closed_datetime\n1,Open,2024-01-01,garbage\n";
        let records = parse_snapshot(csv.as_bytes().to_vec()).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].closed_datetime, None);
        assert_eq!(records[0].area, None);
        assert_eq!(records[0].time_to_close, None);
    }

    #[test]
    fn test_parse_rejects_bad_identifier() {
        let csv = "cartodb_id,status\nabc,Open\n";
        assert!(parse_snapshot(csv.as_bytes().to_vec()).is_err());
    }

    #[test]
    fn test_malformed_numbers_read_as_null() {
        let csv = "cartodb_id,objectid,status,lat,lon\n1,abc,Open,north,-75.16\n";
        let records = parse_snapshot(csv.as_bytes().to_vec()).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].objectid, None);
        assert_eq!(records[0].lat, None);
        assert_eq!(records[0].lon, Some(-75.16));
    }

    #[test]
    fn test_latin1_fallback() {
        // "Caf\xe9" is latin-1 for "Café" and not valid UTF-8
        let mut bytes = b"cartodb_id,status,status_notes\n1,Closed,Caf".to_vec();
        bytes.push(0xE9);
        bytes.push(b'\n');

        let records = parse_snapshot(bytes).unwrap();
        assert_eq!(records[0].status_notes.as_deref(), Some("Café"));
    }

    #[test]
    fn test_utf8_is_not_double_decoded() {
        let text = decode_text("Café".as_bytes().to_vec());
        assert_eq!(text, "Café");
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://raw.githubusercontent.com/x/graffiti.csv"));
        assert!(is_remote("http://localhost/graffiti.csv"));
        assert!(!is_remote("graffiti.csv"));
        assert!(!is_remote("/data/graffiti.csv"));
    }
}
