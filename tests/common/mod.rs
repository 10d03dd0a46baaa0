// Shared helpers for integration tests: a wiremock-backed fake CT log and
// RFC 6962 leaf framing around a real test certificate.
use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use certstream::config::Config;

/// Self-signed test certificate, CN=example.com with SANs example.com and
/// www.example.com.
pub const TEST_CERT_DER_B64: &str = "MIIB1zCCAX6gAwIBAgIUe4iSysD201PZWeanjJkpG/tAGpgwCgYIKoZIzj0EAwIwLTEUMBIGA1UEAwwLZXhhbXBsZS5jb20xFTATBgNVBAoMDEV4YW1wbGUgQ29ycDAeFw0yNjA4MDcxNTM2MjBaFw0zNjA4MDQxNTM2MjBaMC0xFDASBgNVBAMMC2V4YW1wbGUuY29tMRUwEwYDVQQKDAxFeGFtcGxlIENvcnAwWTATBgcqhkjOPQIBBggqhkjOPQMBBwNCAAT6CkADOyPXmeVTsSqc5ho/781PxoBW9zLG2C6rdBGiE/isdTF3TE1cI4Z84nQnuYyHGogay/OUuw57JhXQUg5Po3wwejAdBgNVHQ4EFgQUqj8uhpFjX5ohzcjq1GAaJaNYX4owHwYDVR0jBBgwFoAUqj8uhpFjX5ohzcjq1GAaJaNYX4owDwYDVR0TAQH/BAUwAwEB/zAnBgNVHREEIDAeggtleGFtcGxlLmNvbYIPd3d3LmV4YW1wbGUuY29tMAoGCCqGSM49BAMCA0cAMEQCIDuRN2AEKD83TmJecLfTE/CGeiFb5XRx9yFwFAPDzhXjAiBSJDRESX7PoaPy4/HRrg/59zU+EVHsxSQCOrGccGqptg==";

/// Assemble the base64 MerkleTreeLeaf for an x509 entry around the test
/// certificate.
pub fn test_leaf_input() -> String {
    let der = base64::engine::general_purpose::STANDARD
        .decode(TEST_CERT_DER_B64)
        .unwrap();

    let mut leaf = vec![0u8, 0u8]; // version, leaf_type
    leaf.extend_from_slice(&1700000000000u64.to_be_bytes()); // timestamp
    leaf.extend_from_slice(&0u16.to_be_bytes()); // entry_type = x509_entry
    leaf.extend_from_slice(&(der.len() as u32).to_be_bytes()[1..]); // 3-byte length
    leaf.extend_from_slice(&der);
    leaf.extend_from_slice(&0u16.to_be_bytes()); // ct_extensions
    base64::engine::general_purpose::STANDARD.encode(leaf)
}

/// get-entries responder that serves however much of the requested range the
/// tree covers, every entry carrying the test certificate.
struct EntriesResponder {
    tree_size: u64,
    leaf_input: String,
}

impl Respond for EntriesResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let params: HashMap<String, String> = request
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let start: u64 = params["start"].parse().unwrap();
        let end: u64 = params["end"].parse().unwrap();
        let end = end.min(self.tree_size.saturating_sub(1));

        if start > end {
            return ResponseTemplate::new(400).set_body_string("start beyond tree size");
        }

        let entries: Vec<_> = (start..=end)
            .map(|_| {
                json!({
                    "leaf_input": self.leaf_input,
                    "extra_data": "",
                })
            })
            .collect();

        ResponseTemplate::new(200).set_body_json(json!({ "entries": entries }))
    }
}

/// Mount get-sth and get-entries for a log holding `tree_size` entries.
pub async fn mount_ct_log(server: &MockServer, tree_size: u64) {
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-sth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tree_size": tree_size,
            "timestamp": 1700000000000u64,
            "sha256_root_hash": "",
            "tree_head_signature": "",
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/ct/v1/get-entries"))
        .respond_with(EntriesResponder {
            tree_size,
            leaf_input: test_leaf_input(),
        })
        .mount(server)
        .await;
}

/// Number of get-entries requests the server has seen so far.
pub async fn entries_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/ct/v1/get-entries")
        .count()
}

/// Config pointed at a single mock log, sized for fast tests.
pub fn test_config(log_url: &str) -> Config {
    let mut config = Config::default();
    config.log_list.custom_logs = vec![log_url.to_string()];
    config.general.drop_old_logs = false;
    config.general.shutdown_grace_secs = 5;
    config.fetcher.batch_size = 10;
    config.fetcher.parallel_fetch = 2;
    config.fetcher.num_workers = 2;
    config.fetcher.poll_interval_secs = 1;
    config
}

pub const RECV_TIMEOUT: Duration = Duration::from_secs(10);
