use crate::models::ServiceRequestRecord;
use chrono::{DateTime, Utc};

const SECONDS_PER_DAY: i64 = 86_400;

/// Recomputes `time_to_close` for every row against a fixed "now".
pub struct TimeToCloseCalculator {
    now: DateTime<Utc>,
}

impl TimeToCloseCalculator {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Whole days from request to close, or to now while still open.
    /// Floored, so a close time before the request time counts as a
    /// negative day. `None` when the request time is unknown.
    pub fn days_to_close(&self, record: &ServiceRequestRecord) -> Option<i64> {
        let requested = record.requested_datetime?;
        let end = record.closed_datetime.unwrap_or(self.now);
        Some((end - requested).num_seconds().div_euclid(SECONDS_PER_DAY))
    }

    /// Overwrite `time_to_close` on every row; values from earlier runs are
    /// never trusted.
    pub fn apply(&self, records: &mut [ServiceRequestRecord]) {
        for record in records.iter_mut() {
            record.time_to_close = self.days_to_close(record);
        }
    }
}
