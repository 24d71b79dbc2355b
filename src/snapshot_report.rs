use anyhow::{Context, Result};
use graffiti_sync::data_loader::parse_snapshot;
use graffiti_sync::models::AREA_NOT_APPLICABLE;
use graffiti_sync::ServiceRequestRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Per-area row of `area_summary.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaSummary {
    pub area: String,
    pub requests: usize,
    pub open: usize,
    pub closed: usize,
    pub avg_days_to_close: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotStats {
    pub total_requests: usize,
    pub open: usize,
    pub closed: usize,
    /// Mean `time_to_close` over closed requests, rounded to whole days.
    pub avg_days_to_close: Option<i64>,
    pub areas: Vec<AreaSummary>,
}

fn rounded_mean(total: i64, count: usize) -> Option<i64> {
    if count == 0 {
        None
    } else {
        Some((total as f64 / count as f64).round() as i64)
    }
}

pub fn summarize(records: &[ServiceRequestRecord]) -> SnapshotStats {
    #[derive(Default)]
    struct Acc {
        requests: usize,
        open: usize,
        closed: usize,
        closed_days: i64,
        closed_with_days: usize,
    }

    let mut overall = Acc::default();
    let mut by_area: BTreeMap<String, Acc> = BTreeMap::new();

    for r in records {
        let area = r.area.clone().unwrap_or_else(|| AREA_NOT_APPLICABLE.to_string());
        let acc = by_area.entry(area).or_default();

        for a in [&mut overall, acc] {
            a.requests += 1;
            if r.is_open() {
                a.open += 1;
            }
            if r.is_closed() {
                a.closed += 1;
                if let Some(days) = r.time_to_close {
                    a.closed_days += days;
                    a.closed_with_days += 1;
                }
            }
        }
    }

    let areas = by_area
        .into_iter()
        .map(|(area, a)| AreaSummary {
            area,
            requests: a.requests,
            open: a.open,
            closed: a.closed,
            avg_days_to_close: rounded_mean(a.closed_days, a.closed_with_days),
        })
        .collect();

    SnapshotStats {
        total_requests: overall.requests,
        open: overall.open,
        closed: overall.closed,
        avg_days_to_close: rounded_mean(overall.closed_days, overall.closed_with_days),
        areas,
    }
}

pub fn write_area_summary(path: &Path, areas: &[AreaSummary]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    for area in areas {
        writer.serialize(area)?;
    }
    writer.flush()?;
    Ok(())
}

/// Print the headline numbers and the per-area table for a snapshot, and
/// write the table next to it as `area_summary.csv`.
pub fn generate_report(snapshot: &Path) -> Result<()> {
    println!("\n📊 Graffiti Snapshot Report");
    println!("{}", "=".repeat(60));

    let bytes = std::fs::read(snapshot).with_context(|| format!("Failed to read {:?}", snapshot))?;
    let records = parse_snapshot(bytes)?;
    let stats = summarize(&records);

    let fmt_days = |d: Option<i64>| d.map(|d| d.to_string()).unwrap_or_else(|| "N/A".to_string());

    println!("Total requests: {}", stats.total_requests);
    println!("({}) Closed | ({}) Open", stats.closed, stats.open);
    println!("Average resolution time: {} days", fmt_days(stats.avg_days_to_close));
    println!();
    println!("{:<28} {:>9} {:>7} {:>7} {:>9}", "Area", "Requests", "Open", "Closed", "Avg days");
    for a in &stats.areas {
        println!(
            "{:<28} {:>9} {:>7} {:>7} {:>9}",
            a.area,
            a.requests,
            a.open,
            a.closed,
            fmt_days(a.avg_days_to_close)
        );
    }

    let out = snapshot
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join("area_summary.csv");
    write_area_summary(&out, &stats.areas)?;
    println!("\n✅ Area summary written to {:?}", out);

    Ok(())
}
