use crate::models::{ServiceRequestRecord, STATUS_OPEN};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use serde::Deserialize;
use std::time::Duration;

/// Columns requested from the cases table, in snapshot order.
const SELECT_COLUMNS: [&str; 14] = [
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
];

/// Quote a value as a SQL string literal, doubling embedded quotes.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Most recent `requested_datetime` in the snapshot.
pub fn latest_requested(records: &[ServiceRequestRecord]) -> Option<DateTime<Utc>> {
    records.iter().filter_map(|r| r.requested_datetime).max()
}

/// Query for rows that are new since `since`, or still open upstream while
/// already carrying a close time. Values are rendered from typed fields
/// and quoted, never pasted in as raw text.
#[derive(Debug, Clone)]
pub struct DeltaQuery {
    table: String,
    subject: String,
    since: Option<DateTime<Utc>>,
}

impl DeltaQuery {
    pub fn new(table: &str, subject: &str, since: Option<DateTime<Utc>>) -> Result<Self> {
        if !is_identifier(table) {
            anyhow::bail!("Invalid table name {:?}", table);
        }
        Ok(Self {
            table: table.to_string(),
            subject: subject.to_string(),
            since,
        })
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.since
    }

    pub fn to_sql(&self) -> String {
        let mut predicates = Vec::new();
        // Empty snapshot: no time bound, every matching row is new
        if let Some(since) = self.since {
            predicates.push(format!(
                "((requested_datetime > {}) OR (status = {} AND closed_datetime IS NOT NULL))",
                sql_literal(&since.to_rfc3339_opts(SecondsFormat::Secs, true)),
                sql_literal(STATUS_OPEN)
            ));
        }
        predicates.push(format!("subject = {}", sql_literal(&self.subject)));
        predicates.push("media_url IS NOT NULL AND media_url <> ''".to_string());

        format!(
            "SELECT {} FROM {} WHERE {}",
            SELECT_COLUMNS.join(", "),
            self.table,
            predicates.join(" AND ")
        )
    }
}

#[derive(Debug, Deserialize)]
struct SqlApiResponse {
    rows: Vec<serde_json::Value>,
}

/// Client for the Carto SQL API (`GET <endpoint>?q=<sql>`).
pub struct CartoClient {
    client: reqwest::Client,
    endpoint: String,
}

impl CartoClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    /// Run the delta query once. No paging and no retry: any transport,
    /// status or shape error aborts the sync.
    pub async fn fetch_delta(&self, query: &DeltaQuery) -> Result<Vec<ServiceRequestRecord>> {
        let sql = query.to_sql();
        debug!("Carto query: {}", sql);

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("q", sql.as_str())])
            .send()
            .await
            .with_context(|| format!("Request to {} failed", self.endpoint))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .context("Failed to read Carto response body")?;

        if !status.is_success() {
            anyhow::bail!("Carto API error (status {}): {}", status.as_u16(), body);
        }

        let rows = parse_rows(&body)?;
        info!("Carto returned {} rows", rows.len());
        Ok(rows)
    }
}

/// Decode the `rows` array of a SQL API response body.
pub fn parse_rows(body: &str) -> Result<Vec<ServiceRequestRecord>> {
    let response: SqlApiResponse =
        serde_json::from_str(body).context("Carto response has no `rows` array")?;

    response
        .rows
        .into_iter()
        .enumerate()
        .map(|(idx, mut row)| {
            // zipcode is text in the snapshot; some exports send it as a number
            if let Some(serde_json::Value::Number(n)) = row.get("zipcode") {
                let text = n.to_string();
                row["zipcode"] = serde_json::Value::String(text);
            }
            serde_json::from_value::<ServiceRequestRecord>(row)
                .with_context(|| format!("Malformed Carto row {}", idx))
        })
        .collect()
}
