use crate::models::{ServiceRequestRecord, UpsertStats};
use log::debug;
use std::collections::{HashMap, HashSet};

/// Reconcile a fetched batch into the snapshot, keyed on `cartodb_id`.
///
/// Snapshot rows that are still open with no close time pick up the fetched
/// row's `closed_datetime` and `status_notes`, but only when the fetched row
/// actually has a close time. Fetched rows with an id the snapshot does not
/// know are appended in fetch order. Nothing else is touched, so a closed
/// row is never reopened and applying the same batch twice is a no-op the
/// second time.
pub fn upsert(
    snapshot: &mut Vec<ServiceRequestRecord>,
    fetched: &[ServiceRequestRecord],
) -> UpsertStats {
    let mut stats = UpsertStats::default();

    // First occurrence wins when the API repeats an id
    let mut by_id: HashMap<i64, &ServiceRequestRecord> = HashMap::with_capacity(fetched.len());
    for row in fetched {
        by_id.entry(row.cartodb_id).or_insert(row);
    }

    for record in snapshot.iter_mut().filter(|r| r.awaiting_close()) {
        let Some(update) = by_id.get(&record.cartodb_id) else {
            continue;
        };
        if let Some(closed) = update.closed_datetime {
            debug!("Backfilling close time for request {}", record.cartodb_id);
            record.closed_datetime = Some(closed);
            record.status_notes = update.status_notes.clone();
            stats.backfilled += 1;
        }
    }

    let mut known: HashSet<i64> = snapshot.iter().map(|r| r.cartodb_id).collect();
    for row in fetched {
        if known.insert(row.cartodb_id) {
            snapshot.push(row.clone());
            stats.appended += 1;
        } else {
            stats.ignored += 1;
        }
    }

    stats
}
