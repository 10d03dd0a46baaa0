// src/checkpoint.rs
use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::metrics;

/// How many confirmed deliveries may accumulate before the store writes
/// itself back to disk.
const SAVE_EVERY: u64 = 100;

/// Delivery position of a single log.
///
/// `next_expected` is the lowest index not yet confirmed delivered; every
/// index below it has been handed to the consumer. Confirmations that arrive
/// out of order (multiple decode workers per log) park in `pending` until the
/// gap below them closes.
#[derive(Debug, Clone)]
struct LogPosition {
    next_expected: u64,
    delivered_any: bool,
    pending: BTreeSet<u64>,
}

/// Durable record of the last fully delivered index per log.
///
/// The persisted value only ever advances over contiguous confirmed prefixes,
/// so a restart resumes at or before anything not yet seen by the consumer.
/// With no path configured the store tracks positions in memory only.
pub struct CheckpointStore {
    path: Option<PathBuf>,
    positions: Arc<Mutex<HashMap<String, LogPosition>>>,
    save_counter: Arc<Mutex<u64>>,
}

impl CheckpointStore {
    /// Open the store, loading any existing index file. A missing file means
    /// every log starts fresh; an unreadable one is a startup error.
    pub async fn open(path: Option<PathBuf>) -> Result<Self> {
        let mut positions = HashMap::new();

        if let Some(ref file) = path {
            if file.exists() {
                info!("Loading checkpoint index from {:?}", file);

                let contents = fs::read_to_string(file)
                    .await
                    .context("Failed to read checkpoint file")?;

                let loaded: HashMap<String, u64> =
                    toml::from_str(&contents).context("Failed to parse checkpoint file")?;

                info!("Loaded checkpoints for {} CT logs", loaded.len());

                for (log_url, last_delivered) in loaded {
                    positions.insert(
                        log_url,
                        LogPosition {
                            next_expected: last_delivered + 1,
                            delivered_any: true,
                            pending: BTreeSet::new(),
                        },
                    );
                }
            } else {
                info!("Checkpoint file {:?} does not exist, starting fresh", file);
            }
        }

        Ok(Self {
            path,
            positions: Arc::new(Mutex::new(positions)),
            save_counter: Arc::new(Mutex::new(0)),
        })
    }

    /// Next index to fetch for `log_url`, if a checkpoint was restored.
    pub async fn resume_index(&self, log_url: &str) -> Option<u64> {
        let positions = self.positions.lock().await;
        positions
            .get(log_url)
            .filter(|p| p.delivered_any)
            .map(|p| p.next_expected)
    }

    /// Anchor the low-water mark for a log at its session start position.
    /// A restored checkpoint wins over the caller's `start_index`.
    pub async fn begin_log(&self, log_url: &str, start_index: u64) {
        let mut positions = self.positions.lock().await;
        positions.entry(log_url.to_string()).or_insert(LogPosition {
            next_expected: start_index,
            delivered_any: false,
            pending: BTreeSet::new(),
        });
    }

    /// Record that `index` has been handed to the consumer.
    ///
    /// Advances the log's low-water mark over the contiguous confirmed prefix;
    /// a confirmation above a gap is held pending until the gap closes.
    /// Re-confirming an already-covered index is a no-op.
    pub async fn confirm(&self, log_url: &str, index: u64) {
        let advanced = {
            let mut positions = self.positions.lock().await;
            let pos = positions.entry(log_url.to_string()).or_insert(LogPosition {
                next_expected: index,
                delivered_any: false,
                pending: BTreeSet::new(),
            });

            if index < pos.next_expected {
                false
            } else if index == pos.next_expected {
                pos.next_expected += 1;
                pos.delivered_any = true;
                while pos.pending.remove(&pos.next_expected) {
                    pos.next_expected += 1;
                }
                true
            } else {
                pos.pending.insert(index);
                false
            }
        };

        if !advanced {
            return;
        }

        let mut counter = self.save_counter.lock().await;
        *counter += 1;

        if *counter >= SAVE_EVERY {
            *counter = 0;
            drop(counter);

            if let Err(e) = self.save().await {
                warn!("Failed to auto-save checkpoints: {}", e);
            }
        }
    }

    /// Write all low-water marks to the index file. A write failure degrades
    /// only the resume guarantee, so callers log it and continue.
    pub async fn save(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };

        let snapshot: HashMap<String, u64> = {
            let positions = self.positions.lock().await;
            positions
                .iter()
                .filter(|(_, pos)| pos.delivered_any)
                .map(|(log_url, pos)| (log_url.clone(), pos.next_expected - 1))
                .collect()
        };

        debug!("Saving checkpoints for {} CT logs to {:?}", snapshot.len(), path);

        let result = async {
            let toml_string =
                toml::to_string(&snapshot).context("Failed to serialize checkpoints to TOML")?;

            // Write to a temporary file first, then rename for atomicity
            let temp_path = path.with_extension("tmp");

            fs::write(&temp_path, toml_string)
                .await
                .context("Failed to write temporary checkpoint file")?;

            fs::rename(&temp_path, path)
                .await
                .context("Failed to rename temporary checkpoint file")?;

            Ok(())
        }
        .await;

        match &result {
            Ok(()) => metrics::CHECKPOINT_WRITES_TOTAL
                .with_label_values(&["success"])
                .inc(),
            Err(_) => metrics::CHECKPOINT_WRITES_TOTAL
                .with_label_values(&["failure"])
                .inc(),
        }

        result
    }

    /// Highest contiguously confirmed index for a log, if any was delivered.
    pub async fn last_delivered(&self, log_url: &str) -> Option<u64> {
        let positions = self.positions.lock().await;
        positions
            .get(log_url)
            .filter(|p| p.delivered_any)
            .map(|p| p.next_expected - 1)
    }
}

impl Clone for CheckpointStore {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            positions: Arc::clone(&self.positions),
            save_counter: Arc::clone(&self.save_counter),
        }
    }
}
