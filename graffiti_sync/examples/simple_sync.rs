use chrono::{TimeZone, Utc};
use graffiti_sync::models::{ServiceRequestRecord, STATUS_CLOSED, STATUS_OPEN};
use graffiti_sync::{reconcile, ZipAreaMapper};

fn main() {
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

    // Snapshot: one request still open, no close time yet
    let mut open = ServiceRequestRecord::new(
        1,
        STATUS_OPEN,
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
    );
    open.zipcode = Some("19123".to_string());
    open.address = Some("900 N 2ND ST".to_string());

    // Delta: the same request now closed, plus a brand new one
    let mut closed = open.clone();
    closed.status = STATUS_CLOSED.to_string();
    closed.closed_datetime = Some(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap());
    closed.status_notes = Some("Graffiti removed".to_string());

    let mut fresh = ServiceRequestRecord::new(
        2,
        STATUS_OPEN,
        Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
    );
    fresh.zipcode = Some("19147.0".to_string());

    let mut mapper = ZipAreaMapper::new(&graffiti_sync::models::default_invalid_zipcodes());
    mapper.add_mapping("19123", "Central");

    let out = reconcile(vec![open], &[closed, fresh], Some(&mapper), now);

    println!("Reconciled Snapshot");
    println!("===================");
    println!("As of: {}", now);
    println!(
        "Backfilled: {}  Appended: {}  Dropped: {}",
        out.upsert.backfilled, out.upsert.appended, out.dropped_invalid_zip
    );
    println!();
    for record in &out.records {
        println!(
            "  #{} {} zip={} area={} days={}",
            record.cartodb_id,
            record.status,
            record.zipcode.as_deref().unwrap_or("-"),
            record.area.as_deref().unwrap_or("-"),
            record
                .time_to_close
                .map(|d| d.to_string())
                .unwrap_or_else(|| "N/A".to_string())
        );
    }
}
