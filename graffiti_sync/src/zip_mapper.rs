use crate::data_loader::{decode_text, DataLoader};
use crate::models::{ServiceRequestRecord, AREA_NOT_APPLICABLE};
use anyhow::{Context, Result};
use log::{info, warn};
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;

/// Canonical text form of a zipcode. Trims whitespace and removes the
/// `.0` a float round trip leaves behind (`"19123.0"` becomes `"19123"`).
/// Only an all-zero fraction after all-digit text is removed, so `"19120"`
/// is left alone.
pub fn normalize_zipcode(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some((whole, fraction)) = trimmed.split_once('.') {
        let is_float_artifact = !whole.is_empty()
            && whole.chars().all(|c| c.is_ascii_digit())
            && !fraction.is_empty()
            && fraction.chars().all(|c| c == '0');
        if is_float_artifact {
            return Some(whole.to_string());
        }
    }

    Some(trimmed.to_string())
}

/// Zip → district lookup used to label each request with its area.
pub struct ZipAreaMapper {
    districts: HashMap<String, String>,
    invalid: HashSet<String>,
}

impl ZipAreaMapper {
    pub fn new(invalid_zipcodes: &[String]) -> Self {
        Self {
            districts: HashMap::new(),
            invalid: invalid_zipcodes.iter().cloned().collect(),
        }
    }

    /// Load the reference table (needs `Zip` and `District` columns) from a
    /// local path or URL.
    pub async fn from_source(
        loader: &DataLoader,
        source: &str,
        invalid_zipcodes: &[String],
    ) -> Result<Self> {
        let bytes = loader.read_source(source).await?;
        let mapper = Self::from_csv_bytes(bytes, invalid_zipcodes)
            .with_context(|| format!("Failed to load zip reference {}", source))?;
        info!("Loaded {} zip → district mappings from {}", mapper.len(), source);
        Ok(mapper)
    }

    pub fn from_csv_bytes(bytes: Vec<u8>, invalid_zipcodes: &[String]) -> Result<Self> {
        let text = decode_text(bytes);

        // Every column as text, so zips keep their leading digits
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .into_reader_with_file_handle(Cursor::new(text.into_bytes()))
            .finish()?;

        let zips = df.column("Zip")?.str()?;
        let districts = df.column("District")?.str()?;

        let mut mapper = Self::new(invalid_zipcodes);
        for idx in 0..df.height() {
            if let (Some(zip), Some(district)) = (zips.get(idx), districts.get(idx)) {
                let district = district.trim();
                match normalize_zipcode(zip) {
                    Some(zip) if !district.is_empty() => mapper.add_mapping(&zip, district),
                    _ => {}
                }
            }
        }

        Ok(mapper)
    }

    pub fn add_mapping(&mut self, zip: &str, district: &str) {
        if let Some(previous) = self.districts.insert(zip.to_string(), district.to_string()) {
            if previous != district {
                warn!("Zip {} maps to both {} and {}; keeping {}", zip, previous, district, district);
            }
        }
    }

    pub fn district(&self, zip: &str) -> Option<&str> {
        self.districts.get(zip).map(|d| d.as_str())
    }

    pub fn is_invalid(&self, zip: &str) -> bool {
        self.invalid.contains(zip)
    }

    pub fn len(&self) -> usize {
        self.districts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.districts.is_empty()
    }

    /// Normalize zipcodes, drop rows carrying a known-bad zip, and set
    /// `area` on the rest. Returns how many rows were dropped.
    pub fn enrich(&self, records: &mut Vec<ServiceRequestRecord>) -> usize {
        let before = records.len();

        for record in records.iter_mut() {
            record.zipcode = record.zipcode.as_deref().and_then(normalize_zipcode);
        }

        records.retain(|r| match r.zipcode.as_deref() {
            Some(zip) => !self.is_invalid(zip),
            None => true,
        });

        for record in records.iter_mut() {
            let area = record
                .zipcode
                .as_deref()
                .and_then(|zip| self.district(zip))
                .unwrap_or(AREA_NOT_APPLICABLE);
            record.area = Some(area.to_string());
        }

        before - records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_invalid_zipcodes, STATUS_OPEN};

    fn record(id: i64, zip: Option<&str>) -> ServiceRequestRecord {
        let mut r = ServiceRequestRecord::new(id, STATUS_OPEN, None);
        r.zipcode = zip.map(|z| z.to_string());
        r
    }

    #[test]
    fn test_normalize_zipcode() {
        assert_eq!(normalize_zipcode("19123"), Some("19123".to_string()));
        assert_eq!(normalize_zipcode("19123.0"), Some("19123".to_string()));
        assert_eq!(normalize_zipcode(" 19123.00 "), Some("19123".to_string()));
        assert_eq!(normalize_zipcode("19120"), Some("19120".to_string()));
        assert_eq!(normalize_zipcode("19120.5"), Some("19120.5".to_string()));
        assert_eq!(normalize_zipcode("19103-1234"), Some("19103-1234".to_string()));
        assert_eq!(normalize_zipcode("  "), None);
    }

    #[test]
    fn test_reference_table_from_csv() {
        let csv = "Zip,District\n19123,Central\n19147.0,South\n19120, North \n,Orphan\n19999,\n";
        let mapper = ZipAreaMapper::from_csv_bytes(csv.as_bytes().to_vec(), &[]).unwrap();

        assert_eq!(mapper.len(), 3);
        assert_eq!(mapper.district("19123"), Some("Central"));
        assert_eq!(mapper.district("19147"), Some("South"));
        assert_eq!(mapper.district("19120"), Some("North"));
        assert_eq!(mapper.district("19999"), None);
    }

    #[test]
    fn test_reference_table_requires_columns() {
        let csv = "Zipcode,Area\n19123,Central\n";
        assert!(ZipAreaMapper::from_csv_bytes(csv.as_bytes().to_vec(), &[]).is_err());
    }

    #[test]
    fn test_enrich_labels_drops_and_defaults() {
        let mut mapper = ZipAreaMapper::new(&default_invalid_zipcodes());
        mapper.add_mapping("19123", "Central");

        let mut records = vec![
            record(1, Some("19123")),
            record(2, Some("19123.0")),
            record(3, Some("19104")),
            record(4, Some("00000")),
            record(5, None),
            record(6, Some("99999.0")),
        ];

        let dropped = mapper.enrich(&mut records);

        assert_eq!(dropped, 2);
        let labelled: Vec<(i64, Option<&str>, Option<&str>)> = records
            .iter()
            .map(|r| (r.cartodb_id, r.zipcode.as_deref(), r.area.as_deref()))
            .collect();
        assert_eq!(
            labelled,
            vec![
                (1, Some("19123"), Some("Central")),
                (2, Some("19123"), Some("Central")),
                (3, Some("19104"), Some(AREA_NOT_APPLICABLE)),
                (5, None, Some(AREA_NOT_APPLICABLE)),
            ]
        );
    }
}
