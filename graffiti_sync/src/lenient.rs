//! Field-level serde helpers shared by the CSV snapshot and the Carto JSON
//! rows. Both sources are loosely typed: ids arrive as `7`, `"7"` or `7.0`
//! and timestamps come in several layouts. Timestamps
//! that cannot be parsed become `None` instead of failing the row.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serializer};

/// Layout written back to the snapshot, e.g. `2024-01-10 00:00:00+00:00`.
pub const SNAPSHOT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%#z"];
const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            Scalar::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Scalar::Float(_) => None,
            Scalar::Text(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|v| v.fract() == 0.0)
                        .map(|v| v as i64)
                })
            }
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            Scalar::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    fn into_text(self) -> String {
        match self {
            Scalar::Int(v) => v.to_string(),
            Scalar::Float(v) => v.to_string(),
            Scalar::Text(s) => s,
        }
    }
}

/// Parse a timestamp in any layout the snapshot or the API has been seen to
/// use. Values without an offset are taken as UTC.
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn format_utc(dt: &DateTime<Utc>) -> String {
    dt.format(SNAPSHOT_DATETIME_FORMAT).to_string()
}

pub mod opt_utc {
    use super::*;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_some(&format_utc(dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.and_then(|text| {
            let parsed = parse_utc(&text);
            if parsed.is_none() {
                log::debug!("Unparseable timestamp {:?} coerced to null", text);
            }
            parsed
        }))
    }
}

pub fn id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Scalar::deserialize(deserializer)?;
    raw.as_i64()
        .ok_or_else(|| de::Error::custom(format!("expected an integer id, got {:?}", raw.into_text())))
}

pub fn opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Scalar>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| {
        let parsed = v.as_i64();
        if parsed.is_none() {
            log::debug!("Unparseable integer {:?} coerced to null", v.into_text());
        }
        parsed
    }))
}

pub fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Scalar>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| {
        let parsed = v.as_f64();
        if parsed.is_none() {
            log::debug!("Unparseable number {:?} coerced to null", v.into_text());
        }
        parsed
    }))
}

/// Text column kept verbatim (no numeric inference, so `"01234"` survives);
/// blank text reads as `None`.
pub fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()))
}

/// Required text column; a JSON `null` reads as the empty string.
pub fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_snapshot_and_api_layouts() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 10, 8, 30, 0).unwrap();

        assert_eq!(parse_utc("2024-01-10 08:30:00+00:00"), Some(expected));
        assert_eq!(parse_utc("2024-01-10T08:30:00Z"), Some(expected));
        assert_eq!(parse_utc("2024-01-10T03:30:00-05:00"), Some(expected));
        assert_eq!(parse_utc("2024-01-10 08:30:00"), Some(expected));
        assert_eq!(parse_utc(" 2024-01-10 08:30:00.000+00 "), Some(expected));
    }

    #[test]
    fn test_parse_bare_date_is_midnight_utc() {
        assert_eq!(
            parse_utc("2024-02-01"),
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_unparseable_timestamps_are_none() {
        assert_eq!(parse_utc(""), None);
        assert_eq!(parse_utc("   "), None);
        assert_eq!(parse_utc("not a date"), None);
        assert_eq!(parse_utc("2024-13-45"), None);
    }

    #[test]
    fn test_format_matches_snapshot_layout() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(format_utc(&dt), "2024-01-10 00:00:00+00:00");
    }

    #[test]
    fn test_scalar_integer_coercion() {
        assert_eq!(Scalar::Text("7".into()).as_i64(), Some(7));
        assert_eq!(Scalar::Text("7.0".into()).as_i64(), Some(7));
        assert_eq!(Scalar::Float(7.5).as_i64(), None);
        assert_eq!(Scalar::Text("seven".into()).as_i64(), None);
    }
}
