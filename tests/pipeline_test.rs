// End-to-end pipeline tests against a wiremock-backed fake CT log.
mod common;

use std::time::Duration;

use tempfile::TempDir;
use tokio::time::timeout;
use wiremock::MockServer;

use certstream::{CertStream, Entry, EntryKind};
use common::{entries_requests, mount_ct_log, test_config, RECV_TIMEOUT};

async fn recv_entry(rx: &mut tokio::sync::mpsc::Receiver<Entry>) -> Entry {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for entry")
        .expect("entry stream closed early")
}

#[tokio::test]
async fn test_entries_arrive_in_order_and_fully_decoded() {
    let server = MockServer::start().await;
    mount_ct_log(&server, 35).await;

    let log_url = format!("{}/", server.uri());
    let mut stream = CertStream::from_config(test_config(&log_url));
    let mut entries = stream.start().await.unwrap();

    for expected_index in 0..35u64 {
        let entry = recv_entry(&mut entries).await;
        assert_eq!(entry.index, expected_index);
        assert_eq!(entry.source_url, log_url);
        assert_eq!(entry.kind, EntryKind::X509LogEntry);
        assert_eq!(
            entry.leaf_cert.all_domains,
            vec!["example.com".to_string(), "www.example.com".to_string()]
        );
        assert!(!entry.leaf_cert.fingerprint.is_empty());
    }

    stream.stop();
    stream.wait().await;

    // Stream closes exactly once, after full shutdown
    let closed = timeout(RECV_TIMEOUT, entries.recv()).await.unwrap();
    assert!(closed.is_none());
}

#[tokio::test]
async fn test_stalled_consumer_suspends_fetching_without_loss() {
    let server = MockServer::start().await;
    mount_ct_log(&server, 1000).await;

    let log_url = format!("{}/", server.uri());
    let mut config = test_config(&log_url);
    config.general.buffer_sizes.ct_log = 1;
    config.general.buffer_sizes.broadcast_manager = 2;
    config.fetcher.batch_size = 2;
    config.fetcher.parallel_fetch = 1;
    config.fetcher.num_workers = 1;

    let mut stream = CertStream::from_config(config);
    let mut entries = stream.start().await.unwrap();

    // Nobody consumes: every stage fills up and the fetcher must stop
    // issuing ranges even though 500 batches are available
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let requests_when_stalled = entries_requests(&server).await;
    assert!(
        requests_when_stalled < 15,
        "fetcher kept issuing requests against a stalled consumer: {}",
        requests_when_stalled
    );

    // Fully suspended: no further requests while the consumer stays away
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(entries_requests(&server).await, requests_when_stalled);

    // Nothing was dropped while producers were blocked
    for expected_index in 0..6u64 {
        let entry = recv_entry(&mut entries).await;
        assert_eq!(entry.index, expected_index);
    }

    stream.stop();
    stream.wait().await;
}

#[tokio::test]
async fn test_stop_twice_is_idempotent_and_closes_stream_once() {
    let server = MockServer::start().await;
    mount_ct_log(&server, 10).await;

    let log_url = format!("{}/", server.uri());
    let mut stream = CertStream::from_config(test_config(&log_url));
    let mut entries = stream.start().await.unwrap();

    let _ = recv_entry(&mut entries).await;

    // Duplicate signals funnel into the same stop path
    stream.stop();
    stream.stop();
    stream.wait().await;
    stream.stop();

    // Drain whatever was in flight, then the stream must end
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        match timeout(Duration::from_secs(5), entries.recv()).await {
            Ok(Some(_)) => assert!(tokio::time::Instant::now() < deadline),
            Ok(None) => break,
            Err(_) => panic!("stream never closed after stop"),
        }
    }
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let server = MockServer::start().await;
    mount_ct_log(&server, 10).await;

    let log_url = format!("{}/", server.uri());
    let mut stream = CertStream::from_config(test_config(&log_url));
    let _entries = stream.start().await.unwrap();

    assert!(stream.start().await.is_err());

    stream.stop();
    stream.wait().await;
}

#[tokio::test]
async fn test_recovery_resumes_after_restart_without_skipping() {
    let server = MockServer::start().await;
    mount_ct_log(&server, 20).await;

    let dir = TempDir::new().unwrap();
    let index_file = dir.path().join("ct-index.toml");
    let log_url = format!("{}/", server.uri());

    // First session: deliver the whole log, then shut down cleanly
    let mut config = test_config(&log_url);
    config.general.recovery.enabled = true;
    config.general.recovery.ct_index_file = index_file.to_string_lossy().into_owned();

    let mut stream = CertStream::from_config(config.clone());
    let mut entries = stream.start().await.unwrap();
    for expected_index in 0..20u64 {
        assert_eq!(recv_entry(&mut entries).await.index, expected_index);
    }
    stream.stop();
    stream.wait().await;

    assert!(index_file.exists(), "checkpoint file was not written");

    // The log grew while we were away
    server.reset().await;
    mount_ct_log(&server, 30).await;

    // Second session resumes exactly past the checkpoint: nothing is
    // reprocessed, nothing unseen is skipped
    let mut stream = CertStream::from_config(config);
    let mut entries = stream.start().await.unwrap();
    for expected_index in 20..30u64 {
        assert_eq!(recv_entry(&mut entries).await.index, expected_index);
    }
    stream.stop();
    stream.wait().await;
}

#[tokio::test]
async fn test_drop_old_logs_skips_backlog() {
    let server = MockServer::start().await;
    mount_ct_log(&server, 1_000_000).await;

    let log_url = format!("{}/", server.uri());
    let mut config = test_config(&log_url);
    config.general.drop_old_logs = true;
    // catch-up window = batch_size * parallel_fetch = 20

    let mut stream = CertStream::from_config(config);
    let mut entries = stream.start().await.unwrap();

    let first = recv_entry(&mut entries).await;
    assert_eq!(first.index, 1_000_000 - 20);

    stream.stop();
    stream.wait().await;
}

#[tokio::test]
async fn test_invalid_configuration_fails_before_startup() {
    let mut config = test_config("https://ct.example.com/");
    config.general.buffer_sizes.broadcast_manager = 0;

    let mut stream = CertStream::from_config(config);
    assert!(stream.start().await.is_err());
}
