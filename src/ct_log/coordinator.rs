// src/ct_log/coordinator.rs
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use super::client::{CtLogClient, LogTransport};
use super::fetcher::LogFetcher;
use super::health::LogHealthTracker;
use super::log_list::LogListFetcher;
use super::ordered_queue::OrderedBatchQueue;
use super::types::LogSource;
use super::worker::{decode_worker, delivery_loop, QueueCloser};
use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::types::Entry;

/// Delay before a failed startup discovery is retried.
const DISCOVERY_RETRY: Duration = Duration::from_secs(10);
/// Cadence of the periodic health summary line.
const HEALTH_SUMMARY_EVERY: Duration = Duration::from_secs(300);
/// Cadence of the time-triggered checkpoint flush.
const CHECKPOINT_FLUSH_EVERY: Duration = Duration::from_secs(60);

/// Owns the fetch/decode pipelines of all discovered logs and the producer
/// side of the shared delivery channel.
///
/// `run` discovers the log set, spawns one pipeline per log, respawns
/// pipelines for logs that appear in later list refreshes, and on shutdown
/// drains everything inside the grace period before flushing checkpoints.
/// The delivery channel closes when `run` returns and the last pipeline
/// task is gone, and never before.
pub struct Coordinator {
    config: Config,
    checkpoint: CheckpointStore,
    health: Arc<LogHealthTracker>,
    entry_tx: mpsc::Sender<Entry>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    pipelines: HashMap<String, Vec<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(
        config: Config,
        checkpoint: CheckpointStore,
        entry_tx: mpsc::Sender<Entry>,
        shutdown_tx: watch::Sender<bool>,
    ) -> Self {
        let shutdown_rx = shutdown_tx.subscribe();
        Self {
            config,
            checkpoint,
            health: Arc::new(LogHealthTracker::default()),
            entry_tx,
            shutdown_tx,
            shutdown_rx,
            pipelines: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        let discovery = match LogListFetcher::new() {
            Ok(discovery) => discovery,
            Err(e) => {
                error!("Failed to build log list client: {}", e);
                return;
            }
        };

        let Some(sources) = self.discover_until_ready(&discovery).await else {
            self.drain_pipelines().await;
            return;
        };

        info!("Starting pipelines for {} CT logs", sources.len());
        for source in sources {
            self.spawn_pipeline(source).await;
        }

        let mut refresh = interval_at(
            Instant::now() + self.config.log_list.refresh_interval(),
            self.config.log_list.refresh_interval(),
        );
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut health_ticker =
            interval_at(Instant::now() + HEALTH_SUMMARY_EVERY, HEALTH_SUMMARY_EVERY);
        let mut checkpoint_ticker = interval_at(
            Instant::now() + CHECKPOINT_FLUSH_EVERY,
            CHECKPOINT_FLUSH_EVERY,
        );

        let mut shutdown_rx = self.shutdown_rx.clone();
        while !*shutdown_rx.borrow() {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = refresh.tick() => self.refresh_logs(&discovery).await,
                _ = health_ticker.tick() => self.health.log_summary().await,
                _ = checkpoint_ticker.tick() => {
                    if let Err(e) = self.checkpoint.save().await {
                        warn!("Periodic checkpoint save failed: {}", e);
                    }
                }
            }
        }

        info!("Coordinator shutting down");
        self.drain_pipelines().await;
    }

    /// Startup discovery, retried until a non-empty log set is resolved.
    /// Returns `None` on shutdown.
    async fn discover_until_ready(&mut self, discovery: &LogListFetcher) -> Option<Vec<LogSource>> {
        loop {
            if *self.shutdown_rx.borrow() {
                return None;
            }

            match discovery.discover(&self.config.log_list).await {
                Ok(sources) if !sources.is_empty() => return Some(sources),
                Ok(_) => warn!("Log discovery returned no logs, retrying"),
                Err(e) => warn!("Log discovery failed: {}, retrying", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(DISCOVERY_RETRY) => {}
                _ = self.shutdown_rx.changed() => {}
            }
        }
    }

    /// Wire up fetcher, decode workers and delivery task for one log.
    async fn spawn_pipeline(&mut self, source: LogSource) {
        if self.pipelines.contains_key(&source.url) {
            return;
        }

        let transport: Arc<dyn LogTransport> =
            match CtLogClient::new(&source.url, self.config.fetcher.http_timeout()) {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    error!("Failed to create client for {}: {}", source.url, e);
                    return;
                }
            };

        let source = Arc::new(source);
        let fetcher_config = self.config.fetcher.clone();
        let resume_from = self.checkpoint.resume_index(&source.url).await;

        let (batch_tx, batch_rx) = mpsc::channel(self.config.general.buffer_sizes.ct_log);
        let batch_rx = Arc::new(Mutex::new(batch_rx));
        // Enough room that every in-flight fetch and worker can park a batch
        let queue = Arc::new(OrderedBatchQueue::new(
            fetcher_config.parallel_fetch + fetcher_config.num_workers,
        ));

        let mut handles = Vec::with_capacity(fetcher_config.num_workers + 2);

        let fetcher = LogFetcher::new(
            Arc::clone(&source),
            transport,
            Arc::clone(&self.health),
            fetcher_config.clone(),
            self.config.general.drop_old_logs,
        );
        handles.push(tokio::spawn(fetcher.run(
            resume_from,
            Arc::clone(&queue),
            self.checkpoint.clone(),
            batch_tx,
            self.shutdown_rx.clone(),
        )));

        let closer = QueueCloser::new(Arc::clone(&queue));
        for _ in 0..fetcher_config.num_workers {
            handles.push(tokio::spawn(decode_worker(
                Arc::clone(&source),
                Arc::clone(&batch_rx),
                Arc::clone(&queue),
                Arc::clone(&closer),
            )));
        }
        drop(closer);

        handles.push(tokio::spawn(delivery_loop(
            Arc::clone(&source),
            queue,
            self.entry_tx.clone(),
            self.checkpoint.clone(),
            fetcher_config.decode_errors,
            self.shutdown_tx.clone(),
        )));

        info!(
            "Started pipeline for {} ({} workers, resume={:?})",
            source.url, fetcher_config.num_workers, resume_from
        );
        self.pipelines.insert(source.url.clone(), handles);
    }

    /// Re-run discovery and start pipelines for logs we have not seen yet.
    /// Existing pipelines are never restarted.
    async fn refresh_logs(&mut self, discovery: &LogListFetcher) {
        match discovery.discover(&self.config.log_list).await {
            Ok(sources) => {
                for source in sources {
                    if !self.pipelines.contains_key(&source.url) {
                        info!("Discovered new CT log: {}", source.url);
                        self.spawn_pipeline(source).await;
                    }
                }
            }
            Err(e) => warn!("Log list refresh failed: {}", e),
        }
    }

    /// Let in-flight work finish within the grace period, abort whatever
    /// remains, then flush checkpoints.
    async fn drain_pipelines(&mut self) {
        let grace = Duration::from_secs(self.config.general.shutdown_grace_secs);
        let handles: Vec<JoinHandle<()>> =
            self.pipelines.drain().flat_map(|(_, hs)| hs).collect();

        if !handles.is_empty() {
            info!(
                "Waiting up to {:?} for {} pipeline tasks to finish",
                grace,
                handles.len()
            );

            let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
            let mut all_done = join_all(handles);

            if tokio::time::timeout(grace, &mut all_done).await.is_err() {
                warn!("Shutdown grace period elapsed, aborting remaining pipeline tasks");
                for abort in &aborts {
                    abort.abort();
                }
                let _ = all_done.await;
            }
        }

        if let Err(e) = self.checkpoint.save().await {
            warn!("Failed to flush checkpoints at shutdown: {}", e);
        }

        info!("All pipeline tasks stopped");
    }
}
