use chrono::{DateTime, TimeZone, Utc};
use graffiti_sync::data_loader::parse_snapshot;
use graffiti_sync::{CartoClient, DeltaQuery, SyncConfig, SyncPipeline};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const SNAPSHOT_CSV: &str = "\
cartodb_id,objectid,service_request_id,status,status_notes,requested_datetime,updated_datetime,expected_datetime,closed_datetime,address,zipcode,media_url,lat,lon,time_to_close,area
1,11,9001,Open,,2024-01-01 00:00:00+00:00,,,,100 N BROAD ST,19123,https://img/1.jpg,39.96,-75.16,40,Central
";

const DELTA_JSON: &str = r#"{"rows": [
    {"cartodb_id": 1, "status": "Open", "status_notes": "Completed by crew 4",
     "requested_datetime": "2024-01-01T00:00:00Z", "closed_datetime": "2024-01-10T00:00:00Z",
     "zipcode": "19123", "media_url": "https://img/1.jpg"},
    {"cartodb_id": 2, "status": "Open", "requested_datetime": "2024-02-01T00:00:00Z",
     "zipcode": 19147, "media_url": "https://img/2.jpg"}
], "time": 0.02, "total_rows": 2}"#;

const REFERENCE_CSV: &str = "Zip,District\n19123,Central\n19147,South\n";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Accept one connection, answer it with `status` and `body`, and hand back
/// the raw request head.
async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}/api/v2/sql", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut head = Vec::new();
        let mut buf = [0u8; 4096];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
        }

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;

        String::from_utf8_lossy(&head).into_owned()
    });

    (endpoint, handle)
}

fn request_line(head: &str) -> &str {
    head.lines().next().unwrap_or_default()
}

fn local_config(dir: &Path, endpoint: String) -> SyncConfig {
    let snapshot = dir.join("snapshot.csv");
    let reference = dir.join("ref_ziparea.csv");
    std::fs::write(&snapshot, SNAPSHOT_CSV).unwrap();
    std::fs::write(&reference, REFERENCE_CSV).unwrap();

    SyncConfig {
        snapshot_source: snapshot.to_string_lossy().into_owned(),
        reference_source: reference.to_string_lossy().into_owned(),
        output_path: dir.join("out").join("graffiti.csv"),
        api_endpoint: endpoint,
        request_timeout_secs: 5,
        ..SyncConfig::default()
    }
}

#[tokio::test]
async fn test_fetch_delta_sends_sql_as_q_parameter() {
    let (endpoint, server) = serve_once("200 OK", DELTA_JSON).await;
    let client = CartoClient::new(&endpoint, Duration::from_secs(5)).unwrap();
    let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let query = DeltaQuery::new("public_cases_fc", "Graffiti Removal", Some(since)).unwrap();

    let rows = client.fetch_delta(&query).await.unwrap();
    let head = server.await.unwrap();

    let line = request_line(&head);
    assert!(line.starts_with("GET /api/v2/sql?q=SELECT"), "{}", line);
    assert!(line.contains("public_cases_fc"));
    assert!(line.contains("%27Graffiti+Removal%27"));
    assert!(line.ends_with("HTTP/1.1"));

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].cartodb_id, 1);
    assert_eq!(
        rows[0].closed_datetime,
        Some(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap())
    );
    assert_eq!(rows[1].zipcode.as_deref(), Some("19147"));
}

#[tokio::test]
async fn test_fetch_delta_fails_on_server_error() {
    let (endpoint, server) =
        serve_once("500 Internal Server Error", r#"{"error": ["statement timeout"]}"#).await;
    let client = CartoClient::new(&endpoint, Duration::from_secs(5)).unwrap();
    let query = DeltaQuery::new("public_cases_fc", "Graffiti Removal", None).unwrap();

    let err = client.fetch_delta(&query).await.unwrap_err();
    server.await.unwrap();

    let message = format!("{:#}", err);
    assert!(message.contains("status 500"), "{}", message);
    assert!(message.contains("statement timeout"), "{}", message);
}

#[tokio::test]
async fn test_dry_run_leaves_output_unwritten() {
    let dir = tempfile::tempdir().unwrap();
    let (endpoint, server) = serve_once("200 OK", DELTA_JSON).await;
    let config = SyncConfig {
        dry_run: true,
        ..local_config(dir.path(), endpoint)
    };
    let output = config.output_path.clone();

    let summary = SyncPipeline::new(config).unwrap().run(now()).await.unwrap();
    server.await.unwrap();

    assert!(!summary.written);
    assert!(!output.exists());
    assert_eq!(summary.snapshot_rows, 1);
    assert_eq!(summary.fetched_rows, 2);
    assert_eq!(summary.upsert.backfilled, 1);
    assert_eq!(summary.upsert.appended, 1);
    assert_eq!(summary.final_rows, 2);
}

#[tokio::test]
async fn test_run_writes_reconciled_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let (endpoint, server) = serve_once("200 OK", DELTA_JSON).await;
    let config = local_config(dir.path(), endpoint);
    let output = config.output_path.clone();

    let summary = SyncPipeline::new(config).unwrap().run(now()).await.unwrap();
    let head = server.await.unwrap();

    // latest snapshot request time bounds the query
    assert!(request_line(&head).contains("2024-01-01T00%3A00%3A00Z"));
    assert!(summary.written);
    assert_eq!(
        summary.latest_requested,
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    );

    let written = parse_snapshot(std::fs::read(&output).unwrap()).unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(written[0].time_to_close, Some(9));
    assert_eq!(written[1].area.as_deref(), Some("South"));
    assert_eq!(written[1].time_to_close, Some(29));
}
