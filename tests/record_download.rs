//! End-to-end record downloads against a mock file API.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex};
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use atacquire::config::OrganizationMode;
use atacquire::models::{DestinationTag, RecordOutcome};
use atacquire::repository::ProgressStore;
use atacquire::scrapers::{HttpClient, PortalUrls};
use atacquire::services::download::{FetchPolicy, FileFetcher, RecordDownloader, NO_FILES_MESSAGE};
use atacquire::services::{AuditLog, DownloadEvent, RecordState};

const RECORD: &str = "12345678000190-1-000015/2024-000002";
const CANONICAL: &str = "12345678000190-1-15/2024-2";
const FILES: &str = "/api/orgaos/12345678000190/compras/2024/15/atas/2/arquivos";

fn downloader(server: &MockServer, root: &Path, mode: OrganizationMode) -> RecordDownloader {
    let client = HttpClient::new(Duration::from_secs(5), None).unwrap();
    let fetcher = FileFetcher::new(
        client,
        FetchPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        },
    );
    let urls = PortalUrls::new(server.uri(), format!("{}/api", server.uri()));
    let progress = Arc::new(Mutex::new(ProgressStore::open(root)));
    let log = Arc::new(Mutex::new(AuditLog::create(root).unwrap()));
    RecordDownloader::new(fetcher, urls, root, mode, progress, log)
}

fn pdf(name: &str, len: usize) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-disposition", format!("attachment; filename=\"{name}\""))
        .set_body_bytes(vec![b'%'; len])
}

async fn mount_file(server: &MockServer, seq: u32, response: ResponseTemplate, hits: u64) {
    Mock::given(method("GET"))
        .and(path(format!("{FILES}/{seq}")))
        .respond_with(response)
        .expect(hits)
        .mount(server)
        .await;
}

#[tokio::test]
async fn probe_skips_gaps_and_stops_after_three_misses() {
    let server = MockServer::start().await;
    mount_file(&server, 1, ResponseTemplate::new(404), 1).await;
    mount_file(&server, 2, pdf("ata.pdf", 1024), 1).await;
    mount_file(&server, 3, pdf("anexo.pdf", 2048), 1).await;
    for seq in 4..=6 {
        mount_file(&server, seq, ResponseTemplate::new(404), 1).await;
    }
    mount_file(&server, 7, pdf("never.pdf", 1), 0).await;

    let root = TempDir::new().unwrap();
    let downloader = downloader(&server, root.path(), OrganizationMode::Organized);
    let result = downloader.download(RECORD, Some("15/2024")).await.unwrap();

    assert_eq!(result.state, RecordState::Downloaded);
    let outcome = &result.outcome;
    assert!(outcome.success);
    assert_eq!(outcome.identifier, CANONICAL);
    assert_eq!(outcome.display_number.as_deref(), Some("15/2024"));
    assert_eq!(
        outcome.public_link.as_deref(),
        Some(format!("{}/app/atas/12345678000190/2024/15/2", server.uri()).as_str())
    );

    let sequence: Vec<u32> = outcome.files.iter().map(|f| f.sequence_number).collect();
    assert_eq!(sequence, vec![2, 3]);
    assert_eq!(outcome.files[0].size_bytes, 1024);
    assert_eq!(outcome.total_bytes(), 3072);

    let folder = outcome.storage_folder.as_deref().unwrap();
    assert!(folder.ends_with("0001-12345678000190-1-15-2024-2"));
    assert!(Path::new(folder).join("ata.pdf").exists());
    assert!(Path::new(folder).join("anexo.pdf").exists());
    assert!(!root.path().join("ata.pdf").exists());

    let reloaded = ProgressStore::open(root.path());
    assert!(reloaded.is_processed(RECORD));
    assert_eq!(reloaded.records().len(), 1);

    let log_path = downloader.audit_log().lock().await.finish();
    let log = std::fs::read_to_string(log_path).unwrap();
    assert!(log.contains(&format!("Record: {CANONICAL}")));
    assert!(log.contains("ata.pdf (1.00 KB)"));
    assert!(log.contains("Summary: 2 file(s), 3.00 KB"));
}

#[tokio::test]
async fn existing_file_counts_as_success() {
    let server = MockServer::start().await;
    mount_file(&server, 1, pdf("ata.pdf", 10), 1).await;
    mount_file(&server, 2, pdf("anexo.pdf", 20), 1).await;

    let root = TempDir::new().unwrap();
    std::fs::write(root.path().join("ata.pdf"), b"previous").unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let downloader =
        downloader(&server, root.path(), OrganizationMode::Direct).with_events(tx);
    let result = downloader.download(RECORD, None).await.unwrap();
    drop(downloader);

    assert_eq!(result.state, RecordState::Downloaded);
    let files = &result.outcome.files;
    assert_eq!(files.len(), 2);
    assert!(files[0].already_existed);
    assert_eq!(files[0].size_bytes, 8);
    assert!(!files[1].already_existed);
    assert_eq!(files[0].destination_tags, vec![DestinationTag::Direct]);
    assert_eq!(std::fs::read(root.path().join("ata.pdf")).unwrap(), b"previous");

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(matches!(
        events[0],
        DownloadEvent::FileSkipped { sequence_number: 1, .. }
    ));
    assert!(matches!(
        events[1],
        DownloadEvent::FileSaved { sequence_number: 2, size_bytes: 20, .. }
    ));
    let failures = events
        .iter()
        .filter(|e| matches!(e, DownloadEvent::FileFailed { .. }))
        .count();
    assert_eq!(failures, 3);
    assert!(matches!(
        events.last(),
        Some(DownloadEvent::RecordFinished {
            state: RecordState::Downloaded,
            files: 2,
            ..
        })
    ));
}

#[tokio::test]
async fn both_layouts_receive_every_file() {
    let server = MockServer::start().await;
    // One GET per destination.
    mount_file(&server, 1, pdf("ata.pdf", 64), 2).await;

    let root = TempDir::new().unwrap();
    let downloader = downloader(&server, root.path(), OrganizationMode::Both);
    let result = downloader.download(RECORD, None).await.unwrap();

    let file = &result.outcome.files[0];
    assert_eq!(
        file.destination_tags,
        vec![DestinationTag::Direct, DestinationTag::Organized]
    );
    assert_eq!(std::fs::read(root.path().join("ata.pdf")).unwrap().len(), 64);
    let folder = result.outcome.storage_folder.unwrap();
    assert_eq!(std::fs::read(Path::new(&folder).join("ata.pdf")).unwrap().len(), 64);
}

#[tokio::test]
async fn processed_record_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let stored = RecordOutcome::succeeded(CANONICAL, vec![])
        .with_display_number(Some("15/2024".into()));
    {
        let mut store = ProgressStore::open(root.path());
        store.upsert(stored.clone());
        store.save().unwrap();
    }

    let downloader = downloader(&server, root.path(), OrganizationMode::Organized);
    let result = downloader.download(RECORD, Some("other")).await.unwrap();

    assert_eq!(result.state, RecordState::AlreadyDownloaded);
    assert_eq!(result.outcome, stored);
    assert!(!root.path().join(".folder-counter.json").exists());
}

#[tokio::test]
async fn record_without_files_is_a_failure() {
    let server = MockServer::start().await;
    for seq in 1..=3 {
        mount_file(&server, seq, ResponseTemplate::new(404), 1).await;
    }

    let root = TempDir::new().unwrap();
    let downloader = downloader(&server, root.path(), OrganizationMode::Direct);
    let result = downloader.download(RECORD, None).await.unwrap();

    assert_eq!(result.state, RecordState::Empty);
    assert!(!result.outcome.success);
    assert_eq!(result.outcome.error_message.as_deref(), Some(NO_FILES_MESSAGE));

    let store = ProgressStore::open(root.path());
    assert!(!store.is_processed(RECORD));
    assert_eq!(store.statistics().failed, 1);
}

#[tokio::test]
async fn server_errors_count_toward_the_probe_limit() {
    let server = MockServer::start().await;
    mount_file(&server, 1, pdf("ata.pdf", 5), 1).await;
    // three attempts per position, three positions
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(9)
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let downloader = downloader(&server, root.path(), OrganizationMode::Direct);
    let result = downloader.download(RECORD, None).await.unwrap();

    assert_eq!(result.state, RecordState::Downloaded);
    assert_eq!(result.outcome.files.len(), 1);
}

#[tokio::test]
async fn malformed_identifier_is_recorded_as_failed() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let downloader = downloader(&server, root.path(), OrganizationMode::Organized);
    let result = downloader.download("  not-an-id  ", None).await.unwrap();

    assert_eq!(result.state, RecordState::Failed);
    assert_eq!(result.outcome.identifier, "not-an-id");
    assert!(result.outcome.public_link.is_none());
    assert!(result
        .outcome
        .error_message
        .as_deref()
        .unwrap()
        .contains("not-an-id"));

    let store = ProgressStore::open(root.path());
    assert_eq!(store.records().len(), 1);
}
