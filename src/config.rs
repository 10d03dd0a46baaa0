// src/config.rs

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Capacities of the two bounded queues in the pipeline.
#[derive(Debug, Deserialize, Clone)]
pub struct BufferSizes {
    /// Per-log input queue capacity, counted in raw batches.
    #[serde(default = "default_ct_log_buffer")]
    pub ct_log: usize,
    /// Shared delivery channel capacity, counted in entries.
    #[serde(default = "default_broadcast_buffer")]
    pub broadcast_manager: usize,
}

fn default_ct_log_buffer() -> usize { 1000 }
fn default_broadcast_buffer() -> usize { 5000 }

impl Default for BufferSizes {
    fn default() -> Self {
        Self {
            ct_log: default_ct_log_buffer(),
            broadcast_manager: default_broadcast_buffer(),
        }
    }
}

/// Checkpoint persistence settings.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RecoveryConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Path of the per-log index file read at startup and written during
    /// operation. Required when `enabled` is true.
    #[serde(default)]
    pub ct_index_file: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default)]
    pub buffer_sizes: BufferSizes,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Skip a log's backlog on first contact and start near its tip.
    #[serde(default = "default_drop_old_logs")]
    pub drop_old_logs: bool,
    /// How long `stop()` waits for in-flight work before abandoning it.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_drop_old_logs() -> bool { true }
fn default_shutdown_grace_secs() -> u64 { 30 }

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            buffer_sizes: BufferSizes::default(),
            recovery: RecoveryConfig::default(),
            drop_old_logs: default_drop_old_logs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// What to do with a batch whose entries fail to decode.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecodeErrorPolicy {
    /// Never confirm failed indices; they are fetched again after a restart.
    #[default]
    Refetch,
    /// Confirm failed indices as handled and move on.
    Skip,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetcherConfig {
    /// Entries requested per get-entries range.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Concurrent in-flight range requests per log.
    #[serde(default = "default_parallel_fetch")]
    pub parallel_fetch: usize,
    /// Decode workers per log.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Idle delay between STH polls once a log is caught up.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub decode_errors: DecodeErrorPolicy,
}

fn default_batch_size() -> u64 { 256 }
fn default_parallel_fetch() -> usize { 4 }
fn default_num_workers() -> usize { 2 }
fn default_http_timeout_secs() -> u64 { 30 }
fn default_poll_interval_secs() -> u64 { 10 }

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            parallel_fetch: default_parallel_fetch(),
            num_workers: default_num_workers(),
            http_timeout_secs: default_http_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            decode_errors: DecodeErrorPolicy::default(),
        }
    }
}

impl FetcherConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Backlog window used when `drop_old_logs` asks for a near-tip start.
    pub fn catch_up_window(&self) -> u64 {
        self.batch_size.saturating_mul(self.parallel_fetch as u64)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogListConfig {
    #[serde(default = "default_log_list_url")]
    pub url: String,
    /// Replaces the public list entirely when non-empty.
    #[serde(default)]
    pub custom_logs: Vec<String>,
    /// Merged with the public list.
    #[serde(default)]
    pub additional_logs: Vec<String>,
    #[serde(default)]
    pub include_readonly: bool,
    #[serde(default)]
    pub include_pending: bool,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

fn default_log_list_url() -> String {
    "https://www.gstatic.com/ct/log_list/v3/all_logs_list.json".to_string()
}
fn default_refresh_interval_secs() -> u64 { 3600 }

impl Default for LogListConfig {
    fn default() -> Self {
        Self {
            url: default_log_list_url(),
            custom_logs: Vec::new(),
            additional_logs: Vec::new(),
            include_readonly: false,
            include_pending: false,
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl LogListConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub log_list: LogListConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&contents)?;
        Ok(cfg)
    }

    /// Reject configurations no pipeline can be built from. Called before
    /// any task is spawned.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.general.buffer_sizes.ct_log == 0 {
            anyhow::bail!("buffer_sizes.ct_log must be greater than zero");
        }
        if self.general.buffer_sizes.broadcast_manager == 0 {
            anyhow::bail!("buffer_sizes.broadcast_manager must be greater than zero");
        }
        if self.general.recovery.enabled && self.general.recovery.ct_index_file.is_empty() {
            anyhow::bail!("recovery.ct_index_file is required when recovery is enabled");
        }
        if self.fetcher.batch_size == 0 {
            anyhow::bail!("fetcher.batch_size must be greater than zero");
        }
        if self.fetcher.parallel_fetch == 0 {
            anyhow::bail!("fetcher.parallel_fetch must be greater than zero");
        }
        if self.fetcher.num_workers == 0 {
            anyhow::bail!("fetcher.num_workers must be greater than zero");
        }
        if self.fetcher.http_timeout_secs == 0 {
            anyhow::bail!("fetcher.http_timeout_secs must be greater than zero");
        }
        if self.log_list.custom_logs.is_empty() && self.log_list.url.is_empty() {
            anyhow::bail!("log_list.url is required when no custom_logs are configured");
        }
        Ok(())
    }
}
