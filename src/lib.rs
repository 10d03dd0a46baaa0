//! certstream: stream Certificate Transparency log entries from every
//! active CT log into one bounded channel, without ever dropping an entry.
//!
//! Consumer slowness propagates backwards: a full delivery channel suspends
//! the decode workers, full decode queues suspend the fetchers, and the
//! whole system settles at the consumer's pace. With recovery enabled the
//! last delivered index per log is persisted, so a restart resumes where it
//! left off instead of reprocessing or skipping entries.
//!
//! ```no_run
//! use certstream::CertStream;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut stream = CertStream::new();
//!     stream.enable_recovery("./ct-index.toml");
//!
//!     // Non-blocking: fetching proceeds in the background
//!     let mut entries = stream.start().await?;
//!
//!     // This loop runs at the consumer's speed; the fetch side slows
//!     // down to match instead of buffering or dropping entries
//!     while let Some(entry) = entries.recv().await {
//!         println!("{}: {:?}", entry, entry.leaf_cert.all_domains);
//!     }
//!
//!     stream.wait().await;
//!     Ok(())
//! }
//! ```

pub mod cert_parser;
pub mod checkpoint;
pub mod config;
pub mod ct_log;
pub mod metrics;
pub mod types;

use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::ct_log::Coordinator;
pub use crate::types::{Entry, EntryKind, LeafCert};

/// Library facade over the CT streaming pipeline.
///
/// Configure before `start`, then consume the returned receiver until it
/// closes. The receiver closes exactly once, after shutdown has fully
/// completed, and never before.
pub struct CertStream {
    config: Config,
    shutdown_tx: Option<watch::Sender<bool>>,
    coordinator: Option<JoinHandle<()>>,
}

impl CertStream {
    /// A stream with default configuration: all usable public logs,
    /// recovery disabled, backlog skipped on first contact.
    pub fn new() -> Self {
        Self::from_config(Config::default())
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            shutdown_tx: None,
            coordinator: None,
        }
    }

    pub fn from_config_file(path: &Path) -> Result<Self> {
        Ok(Self::from_config(Config::from_file(path)?))
    }

    /// Enable resume-after-restart, persisting per-log positions to
    /// `index_file`.
    pub fn enable_recovery(&mut self, index_file: impl Into<String>) {
        self.config.general.recovery.enabled = true;
        self.config.general.recovery.ct_index_file = index_file.into();
    }

    /// Capacities of the per-log batch queues and the shared delivery
    /// channel. The delivery capacity bounds the total number of
    /// undelivered entries across all logs.
    pub fn set_buffer_sizes(&mut self, ct_log: usize, broadcast: usize) {
        self.config.general.buffer_sizes.ct_log = ct_log;
        self.config.general.buffer_sizes.broadcast_manager = broadcast;
    }

    pub fn set_fetcher_options(
        &mut self,
        batch_size: u64,
        parallel_fetch: usize,
        num_workers: usize,
        http_timeout_secs: u64,
    ) {
        self.config.fetcher.batch_size = batch_size;
        self.config.fetcher.parallel_fetch = parallel_fetch;
        self.config.fetcher.num_workers = num_workers;
        self.config.fetcher.http_timeout_secs = http_timeout_secs;
    }

    /// Start streaming. Non-blocking: returns the receive side of the
    /// delivery channel while fetching proceeds in background tasks.
    ///
    /// Configuration problems (invalid sizes, unreadable checkpoint file)
    /// are reported here, before anything is spawned.
    pub async fn start(&mut self) -> Result<mpsc::Receiver<Entry>> {
        if self.shutdown_tx.is_some() {
            anyhow::bail!("certstream is already started");
        }

        self.config.validate()?;

        let _ = metrics::init_metrics();

        let checkpoint_path = if self.config.general.recovery.enabled {
            Some(PathBuf::from(&self.config.general.recovery.ct_index_file))
        } else {
            None
        };
        let checkpoint = CheckpointStore::open(checkpoint_path).await?;

        let (entry_tx, entry_rx) =
            mpsc::channel(self.config.general.buffer_sizes.broadcast_manager);
        let (shutdown_tx, _) = watch::channel(false);

        spawn_signal_handler(shutdown_tx.clone());

        let coordinator = Coordinator::new(
            self.config.clone(),
            checkpoint,
            entry_tx,
            shutdown_tx.clone(),
        );

        info!("Starting certstream");

        self.coordinator = Some(tokio::spawn(coordinator.run()));
        self.shutdown_tx = Some(shutdown_tx);

        Ok(entry_rx)
    }

    /// Request a graceful shutdown. Non-blocking and idempotent: repeated
    /// calls (including via duplicate signals) are no-ops.
    pub fn stop(&self) {
        if let Some(ref shutdown_tx) = self.shutdown_tx {
            info!("Stopping certstream");
            let _ = shutdown_tx.send(true);
        }
    }

    /// Block until shutdown has fully completed and every pipeline task
    /// has been joined.
    pub async fn wait(&mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            let _ = coordinator.await;
        }
    }
}

impl Default for CertStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Route termination signals into the same stop path library callers use.
/// The task exits quietly when shutdown is triggered some other way.
fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = termination_signal() => {
                info!("Received termination signal, shutting down");
                let _ = shutdown_tx.send(true);
            }
            _ = shutdown_rx.changed() => {}
        }
    });
}

#[cfg(unix)]
async fn termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Convenience `tracing` setup honoring `RUST_LOG`, for binaries that have
/// no subscriber of their own.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}
