// src/ct_log/fetcher.rs
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::client::LogTransport;
use super::health::LogHealthTracker;
use super::ordered_queue::OrderedBatchQueue;
use super::types::{LogSource, RawBatch, SignedTreeHead};
use super::worker::DecodedBatch;
use crate::checkpoint::CheckpointStore;
use crate::config::FetcherConfig;
use crate::metrics;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Advances one log's fetch position, keeping up to `parallel_fetch` range
/// requests in flight.
///
/// Completed batches go into the bounded per-log batch channel with a
/// blocking send; a full channel (slow decode, which in turn means a slow
/// consumer) is what throttles the fetcher. There is no explicit rate
/// limiter.
pub struct LogFetcher {
    source: Arc<LogSource>,
    transport: Arc<dyn LogTransport>,
    health: Arc<LogHealthTracker>,
    config: FetcherConfig,
    drop_old_logs: bool,
}

impl LogFetcher {
    pub fn new(
        source: Arc<LogSource>,
        transport: Arc<dyn LogTransport>,
        health: Arc<LogHealthTracker>,
        config: FetcherConfig,
        drop_old_logs: bool,
    ) -> Self {
        Self {
            source,
            transport,
            health,
            config,
            drop_old_logs,
        }
    }

    /// Fetch loop: resolve the start position, then issue contiguous
    /// strictly increasing `[start, end)` ranges until shutdown.
    pub async fn run(
        self,
        resume_from: Option<u64>,
        queue: Arc<OrderedBatchQueue<DecodedBatch>>,
        checkpoint: CheckpointStore,
        batch_tx: mpsc::Sender<RawBatch>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Starting fetcher for {}", self.source.url);

        let Some(sth) = self.initial_sth(&mut shutdown).await else {
            return;
        };
        let mut tree_size = sth.tree_size;

        let start = match resume_from {
            Some(next) => next,
            None if self.drop_old_logs => tree_size.saturating_sub(self.config.catch_up_window()),
            None => 0,
        };

        info!(
            "{}: fetching from index {} (tree_size={})",
            self.source.url, start, tree_size
        );

        checkpoint.begin_log(&self.source.url, start).await;
        queue.set_start(start);

        let mut next_index = start;
        let mut in_flight = FuturesUnordered::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            while in_flight.len() < self.config.parallel_fetch && next_index < tree_size {
                let end = std::cmp::min(next_index + self.config.batch_size, tree_size);
                in_flight.push(self.fetch_range(next_index, end, shutdown.clone()));
                next_index = end;
            }

            if in_flight.is_empty() {
                // Caught up: wait out the poll interval, then ask for a new STH
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                    _ = shutdown.changed() => continue,
                }

                if !self.health.should_poll(&self.source.url).await {
                    debug!("{}: skipping STH poll (health backoff)", self.source.url);
                    continue;
                }

                match self.transport.get_sth().await {
                    Ok(sth) => {
                        self.health.record_success(&self.source.url).await;
                        if sth.tree_size > tree_size {
                            debug!(
                                "{}: tree grew {} -> {}",
                                self.source.url, tree_size, sth.tree_size
                            );
                            tree_size = sth.tree_size;
                        }
                    }
                    Err(e) => {
                        metrics::FETCH_ERRORS_TOTAL
                            .with_label_values(&[self.source.url.as_str()])
                            .inc();
                        self.health
                            .record_failure(&self.source.url, e.to_string())
                            .await;
                    }
                }
            } else {
                tokio::select! {
                    Some(batch) = in_flight.next() => {
                        let Some(batch) = batch else { continue };
                        metrics::BATCHES_FETCHED_TOTAL
                            .with_label_values(&[self.source.url.as_str()])
                            .inc();
                        // Blocking send: a full decode queue suspends us
                        if batch_tx.send(batch).await.is_err() {
                            debug!("{}: batch channel closed, stopping fetcher", self.source.url);
                            return;
                        }
                    }
                    _ = shutdown.changed() => {}
                }
            }
        }

        // Shutdown: issue nothing new, hand off what already completed
        while let Some(batch) = in_flight.next().await {
            if let Some(batch) = batch {
                if batch_tx.send(batch).await.is_err() {
                    break;
                }
            }
        }

        info!("Fetcher for {} stopped", self.source.url);
    }

    /// Fetch the whole `[start, end)` range, re-asking for the remainder
    /// when the server short-returns and retrying transient failures with
    /// exponential backoff. Returns `None` only on shutdown.
    async fn fetch_range(
        &self,
        start: u64,
        end: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<RawBatch> {
        let mut entries = Vec::with_capacity((end - start) as usize);
        let mut next = start;
        let mut backoff = Duration::from_secs(1);

        while next < end {
            if *shutdown.borrow() {
                return None;
            }

            match self.transport.get_entries(next, end - 1).await {
                Ok(mut returned) if !returned.is_empty() => {
                    // Logs may return more than asked; never past our range
                    returned.truncate((end - next) as usize);
                    next += returned.len() as u64;
                    entries.append(&mut returned);
                    backoff = Duration::from_secs(1);
                }
                result => {
                    let error = match result {
                        Ok(_) => format!("empty get-entries response for {}-{}", next, end - 1),
                        Err(e) => e.to_string(),
                    };

                    metrics::FETCH_ERRORS_TOTAL
                        .with_label_values(&[self.source.url.as_str()])
                        .inc();
                    self.health
                        .record_failure(&self.source.url, error.clone())
                        .await;

                    warn!(
                        "{}: error fetching {}-{}: {}. Retrying in {:?}",
                        self.source.url,
                        next,
                        end - 1,
                        error,
                        backoff
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => return None,
                    }
                    backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
                }
            }
        }

        self.health.record_success(&self.source.url).await;

        Some(RawBatch {
            start,
            end,
            entries,
        })
    }

    /// First STH of the session, retried until it succeeds or shutdown.
    async fn initial_sth(&self, shutdown: &mut watch::Receiver<bool>) -> Option<SignedTreeHead> {
        let mut backoff = Duration::from_secs(1);

        loop {
            if *shutdown.borrow() {
                return None;
            }

            match self.transport.get_sth().await {
                Ok(sth) => {
                    self.health.record_success(&self.source.url).await;
                    return Some(sth);
                }
                Err(e) => {
                    metrics::FETCH_ERRORS_TOTAL
                        .with_label_values(&[self.source.url.as_str()])
                        .inc();
                    self.health
                        .record_failure(&self.source.url, e.to_string())
                        .await;

                    warn!(
                        "{}: error fetching initial STH: {}. Retrying in {:?}",
                        self.source.url, e, backoff
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => return None,
                    }
                    backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
                }
            }
        }
    }
}
