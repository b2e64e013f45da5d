use chrono::{TimeZone, Utc};
use rangefetch_core::{Origin, Transfer, TransferError};
use rangefetch_types::TransferRecord;
use reqwest::header::{HeaderValue, RANGE};
use reqwest::Client;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SIZE: usize = 10 * 1024;

fn resource() -> Vec<u8> {
    (0..SIZE).map(|i| (i % 251) as u8).collect()
}

fn ranged(body: &[u8], from: usize) -> ResponseTemplate {
    ResponseTemplate::new(206)
        .insert_header(
            "Content-Range",
            format!("bytes {}-{}/{}", from, body.len() - 1, body.len()).as_str(),
        )
        .set_body_bytes(body[from..].to_vec())
}

/// Serves one connection that promises the whole resource but sends only
/// `sent` bytes before hanging up
async fn truncating_server(body: Vec<u8>, sent: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&body[..sent]).await.unwrap();
        socket.flush().await.unwrap();
    });
    format!("http://{}/resource.bin", addr)
}

fn transfer_for(server: &MockServer, dir: &TempDir) -> Transfer {
    Transfer::new(
        format!("{}/resource.bin", server.uri()),
        dir.path().join("resource.bin"),
    )
}

#[tokio::test]
async fn fresh_download_commits_file_and_record() {
    let server = MockServer::start().await;
    let body = resource();
    Mock::given(method("GET"))
        .and(path("/resource.bin"))
        .and(header("Range", "bytes=0-"))
        .respond_with(ranged(&body, 0).insert_header("Content-Type", "application/pdf"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let transfer = transfer_for(&server, &dir);
    let result = transfer.fetch(&Client::new()).await.unwrap();

    assert_eq!(result.origin, Origin::Fetched);
    assert_eq!(result.bytes_transferred, SIZE as u64);
    assert_eq!(result.total_size, SIZE as u64);
    assert_eq!(result.extension().as_deref(), Some(".pdf"));
    assert_eq!(tokio::fs::read(transfer.output()).await.unwrap(), body);
    assert!(!transfer.partial_path().exists());

    let record: TransferRecord =
        serde_json::from_slice(&tokio::fs::read(transfer.record_path()).await.unwrap()).unwrap();
    assert_eq!(record.url, transfer.url());
    assert_eq!(record.total_size, SIZE as u64);
    assert_eq!(record.headers["content-type"], vec!["application/pdf".to_string()]);
}

#[tokio::test]
async fn resume_appends_only_the_missing_bytes() {
    let server = MockServer::start().await;
    let body = resource();
    Mock::given(method("GET"))
        .and(header("Range", "bytes=4096-"))
        .respond_with(ranged(&body, 4096))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let transfer = transfer_for(&server, &dir);
    tokio::fs::write(transfer.partial_path(), &body[..4096]).await.unwrap();

    let result = transfer.fetch(&Client::new()).await.unwrap();
    assert_eq!(result.resumed_from, 4096);
    assert_eq!(result.bytes_transferred, 6144);
    assert_eq!(tokio::fs::read(transfer.output()).await.unwrap(), body);
}

#[tokio::test]
async fn server_ignoring_range_restarts_from_scratch() {
    let server = MockServer::start().await;
    let body = resource();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let transfer = transfer_for(&server, &dir);
    // Not a prefix of the resource: must be discarded, not appended to
    tokio::fs::write(transfer.partial_path(), vec![0xAAu8; 4096]).await.unwrap();

    let result = transfer.fetch(&Client::new()).await.unwrap();
    assert_eq!(result.resumed_from, 0);
    assert_eq!(result.bytes_transferred, SIZE as u64);
    assert_eq!(tokio::fs::read(transfer.output()).await.unwrap(), body);
}

#[tokio::test]
async fn not_found_leaves_partial_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let transfer = transfer_for(&server, &dir);
    tokio::fs::write(transfer.partial_path(), b"kept").await.unwrap();

    let err = transfer.fetch(&Client::new()).await.unwrap_err();
    assert!(matches!(err, TransferError::UnexpectedStatus { status: 404, .. }));
    assert!(!transfer.output().exists());
    assert!(!transfer.record_path().exists());
    assert_eq!(tokio::fs::read(transfer.partial_path()).await.unwrap(), b"kept");
}

#[tokio::test]
async fn second_run_makes_no_request() {
    let server = MockServer::start().await;
    let body = resource();
    Mock::given(method("GET"))
        .respond_with(ranged(&body, 0))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let transfer = transfer_for(&server, &dir);
    let client = Client::new();
    let first = transfer.fetch(&client).await.unwrap();
    let second = transfer.fetch(&client).await.unwrap();

    assert_eq!(second.origin, Origin::Recorded);
    assert_eq!(second.bytes_transferred, 0);
    assert_eq!(second.total_size, first.total_size);
    assert_eq!(second.started_at, first.started_at);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    // A fresh transfer value for the same output sees the record too
    let again = transfer_for(&server, &dir).fetch(&client).await.unwrap();
    assert!(again.is_recorded());
}

#[tokio::test]
async fn complete_partial_with_416_is_committed() {
    let server = MockServer::start().await;
    let body = resource();
    Mock::given(method("GET"))
        .and(header("Range", format!("bytes={}-", SIZE).as_str()))
        .respond_with(
            ResponseTemplate::new(416)
                .insert_header("Content-Range", format!("bytes */{}", SIZE).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let transfer = transfer_for(&server, &dir);
    tokio::fs::write(transfer.partial_path(), &body).await.unwrap();

    let result = transfer.fetch(&Client::new()).await.unwrap();
    assert_eq!(result.bytes_transferred, 0);
    assert_eq!(result.total_size, SIZE as u64);
    assert_eq!(tokio::fs::read(transfer.output()).await.unwrap(), body);
    assert!(transfer.record_path().exists());
}

#[tokio::test]
async fn oversized_partial_with_416_restarts() {
    let server = MockServer::start().await;
    let body = resource();
    Mock::given(method("GET"))
        .and(header("Range", "bytes=12000-"))
        .respond_with(
            ResponseTemplate::new(416)
                .insert_header("Content-Range", format!("bytes */{}", SIZE).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("Range", "bytes=0-"))
        .respond_with(ranged(&body, 0))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let transfer = transfer_for(&server, &dir);
    tokio::fs::write(transfer.partial_path(), vec![1u8; 12000]).await.unwrap();

    let result = transfer.fetch(&Client::new()).await.unwrap();
    assert_eq!(result.resumed_from, 0);
    assert_eq!(result.bytes_transferred, SIZE as u64);
    assert_eq!(tokio::fs::read(transfer.output()).await.unwrap(), body);
}

#[tokio::test]
async fn misaligned_partial_content_is_rejected() {
    let server = MockServer::start().await;
    let body = resource();
    Mock::given(method("GET"))
        .respond_with(ranged(&body, 0))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let transfer = transfer_for(&server, &dir);
    tokio::fs::write(transfer.partial_path(), &body[..4096]).await.unwrap();

    let err = transfer.fetch(&Client::new()).await.unwrap_err();
    assert!(matches!(
        err,
        TransferError::RangeMismatch { expected: 4096, actual: 0 }
    ));
    assert_eq!(tokio::fs::read(transfer.partial_path()).await.unwrap(), &body[..4096]);
}

#[tokio::test]
async fn caller_range_header_never_wins() {
    let server = MockServer::start().await;
    let body = resource();
    Mock::given(method("GET"))
        .and(header("Range", "bytes=4096-"))
        .respond_with(ranged(&body, 4096))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let transfer = transfer_for(&server, &dir)
        .with_header(RANGE, HeaderValue::from_static("bytes=0-99"));
    tokio::fs::write(transfer.partial_path(), &body[..4096]).await.unwrap();

    transfer.fetch(&Client::new()).await.unwrap();
    assert_eq!(tokio::fs::read(transfer.output()).await.unwrap(), body);
}

#[tokio::test]
async fn timeout_surfaces_as_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let transfer = transfer_for(&server, &dir).with_timeout(Some(Duration::from_millis(200)));

    let err = transfer.fetch(&Client::new()).await.unwrap_err();
    assert!(matches!(err, TransferError::Timeout(_)));
    assert!(err.is_network());
    assert!(!transfer.output().exists());
    assert!(transfer.partial_path().exists());
}

#[tokio::test]
async fn last_modified_becomes_file_mtime() {
    let server = MockServer::start().await;
    let body = resource();
    Mock::given(method("GET"))
        .respond_with(ranged(&body, 0).insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let transfer = transfer_for(&server, &dir);
    let result = transfer.fetch(&Client::new()).await.unwrap();

    let expected = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
    assert_eq!(result.modified_time(), expected);
    let mtime = std::fs::metadata(transfer.output()).unwrap().modified().unwrap();
    assert_eq!(mtime, SystemTime::from(expected));
}

#[tokio::test]
async fn output_directories_are_created() {
    let server = MockServer::start().await;
    let body = resource();
    Mock::given(method("GET"))
        .respond_with(ranged(&body, 0))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let transfer = Transfer::new(
        format!("{}/resource.bin", server.uri()),
        dir.path().join("a").join("b").join("resource.bin"),
    );
    transfer.fetch(&Client::new()).await.unwrap();
    assert_eq!(tokio::fs::read(transfer.output()).await.unwrap(), body);
}

#[tokio::test]
async fn dropped_body_keeps_received_prefix_for_next_run() {
    let body = resource();
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("resource.bin");

    let url = truncating_server(body.clone(), 4096).await;
    let first = Transfer::new(url, &output);
    let err = first.fetch(&Client::new()).await.unwrap_err();
    assert!(matches!(err, TransferError::Network(_)));
    assert!(!first.output().exists());
    assert!(!first.record_path().exists());
    assert_eq!(tokio::fs::read(first.partial_path()).await.unwrap(), &body[..4096]);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("Range", "bytes=4096-"))
        .respond_with(ranged(&body, 4096))
        .expect(1)
        .mount(&server)
        .await;
    let second = transfer_for(&server, &dir);
    let result = second.fetch(&Client::new()).await.unwrap();

    assert_eq!(result.resumed_from, 4096);
    assert_eq!(result.bytes_transferred, 6144);
    assert_eq!(tokio::fs::read(second.output()).await.unwrap(), body);
}

#[tokio::test]
async fn output_left_without_record_is_recommitted() {
    let server = MockServer::start().await;
    let body = resource();
    Mock::given(method("GET"))
        .and(header("Range", format!("bytes={}-", SIZE).as_str()))
        .respond_with(
            ResponseTemplate::new(416)
                .insert_header("Content-Range", format!("bytes */{}", SIZE).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let transfer = transfer_for(&server, &dir);
    // Renamed into place, but the record was never written
    tokio::fs::write(transfer.output(), &body).await.unwrap();

    let result = transfer.fetch(&Client::new()).await.unwrap();
    assert_eq!(result.resumed_from, SIZE as u64);
    assert_eq!(result.bytes_transferred, 0);
    assert_eq!(tokio::fs::read(transfer.output()).await.unwrap(), body);
    assert!(!transfer.partial_path().exists());
    assert!(transfer.record_path().exists());
}
