// src/ct_log/worker.rs
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

use super::ordered_queue::OrderedBatchQueue;
use super::types::{LogSource, RawBatch};
use crate::cert_parser;
use crate::checkpoint::CheckpointStore;
use crate::config::DecodeErrorPolicy;
use crate::metrics;
use crate::types::Entry;

/// Result of decoding one raw batch. Slots keep their log index; a `None`
/// slot is an entry that failed to decode (already logged and counted).
pub struct DecodedBatch {
    pub start: u64,
    pub end: u64,
    pub entries: Vec<(u64, Option<Entry>)>,
}

/// Closes the ordered queue when dropped.
///
/// Every decode worker holds a clone; the queue closes when the last worker
/// exits, whether it finished normally or was cancelled during shutdown.
pub struct QueueCloser(Arc<OrderedBatchQueue<DecodedBatch>>);

impl QueueCloser {
    pub fn new(queue: Arc<OrderedBatchQueue<DecodedBatch>>) -> Arc<Self> {
        Arc::new(Self(queue))
    }
}

impl Drop for QueueCloser {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Decode worker: drains the shared per-log batch queue, decodes one batch
/// to completion at a time, and parks the result in the ordered queue.
///
/// Blocking on a full ordered queue is the middle link of the backpressure
/// chain: delivery stalls fill the queue, which stalls workers, which fills
/// the batch channel, which stalls the fetcher.
pub async fn decode_worker(
    source: Arc<LogSource>,
    batch_rx: Arc<Mutex<mpsc::Receiver<RawBatch>>>,
    queue: Arc<OrderedBatchQueue<DecodedBatch>>,
    _closer: Arc<QueueCloser>,
) {
    loop {
        let batch = {
            let mut rx = batch_rx.lock().await;
            rx.recv().await
        };
        let Some(batch) = batch else {
            break; // fetcher gone, channel drained
        };

        let decoded = decode_batch(&source, batch);
        if !queue.push(decoded.start, decoded.end, decoded).await {
            break; // queue closed during shutdown
        }
    }
}

fn decode_batch(source: &LogSource, batch: RawBatch) -> DecodedBatch {
    let mut entries = Vec::with_capacity(batch.entries.len());

    for (offset, raw) in batch.entries.iter().enumerate() {
        let index = batch.start + offset as u64;

        match cert_parser::decode_log_entry(&raw.leaf_input, &raw.extra_data) {
            Ok(decoded) => {
                entries.push((
                    index,
                    Some(Entry {
                        source_name: source.name.clone(),
                        source_url: source.url.clone(),
                        index,
                        kind: decoded.kind,
                        leaf_cert: decoded.leaf,
                        seen_unix: chrono::Utc::now().timestamp() as f64,
                    }),
                ));
            }
            Err(e) => {
                metrics::DECODE_ERRORS_TOTAL
                    .with_label_values(&[source.url.as_str()])
                    .inc();
                warn!(
                    "{}: failed to decode entry at index {}: {}",
                    source.url, index, e
                );
                entries.push((index, None));
            }
        }
    }

    DecodedBatch {
        start: batch.start,
        end: batch.end,
        entries,
    }
}

/// Delivery task: pops batches in index order and pushes entries one at a
/// time onto the shared delivery channel, confirming each delivered index.
///
/// The send is blocking; when the channel is full the task suspends until
/// the consumer drains space. A closed channel means the consumer dropped
/// the receiver, which is treated as an implicit stop.
pub async fn delivery_loop(
    source: Arc<LogSource>,
    queue: Arc<OrderedBatchQueue<DecodedBatch>>,
    entry_tx: mpsc::Sender<Entry>,
    checkpoint: CheckpointStore,
    decode_errors: DecodeErrorPolicy,
    shutdown_tx: watch::Sender<bool>,
) {
    while let Some(batch) = queue.pop().await {
        for (index, slot) in batch.entries {
            match slot {
                Some(entry) => {
                    if entry_tx.send(entry).await.is_err() {
                        debug!(
                            "{}: delivery channel closed by consumer, requesting stop",
                            source.url
                        );
                        let _ = shutdown_tx.send(true);
                        return;
                    }
                    metrics::ENTRIES_DELIVERED_TOTAL
                        .with_label_values(&[source.url.as_str()])
                        .inc();
                    checkpoint.confirm(&source.url, index).await;
                }
                // Decode failures are never delivered; whether their index
                // is confirmed decides if a restart re-fetches them.
                None => match decode_errors {
                    DecodeErrorPolicy::Skip => checkpoint.confirm(&source.url, index).await,
                    DecodeErrorPolicy::Refetch => {}
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert_parser::fixtures;
    use crate::ct_log::types::LogEntry;
    use std::time::Duration;

    fn source() -> Arc<LogSource> {
        Arc::new(LogSource::from_url("https://ct.example.com/"))
    }

    fn raw_batch(start: u64, end: u64) -> RawBatch {
        let leaf = fixtures::x509_leaf_input(&fixtures::cert_der());
        RawBatch {
            start,
            end,
            entries: (start..end)
                .map(|_| LogEntry {
                    leaf_input: leaf.clone(),
                    extra_data: String::new(),
                })
                .collect(),
        }
    }

    fn garbage_batch(start: u64, end: u64) -> RawBatch {
        RawBatch {
            start,
            end,
            entries: (start..end)
                .map(|_| LogEntry {
                    leaf_input: "!!not-base64!!".to_string(),
                    extra_data: String::new(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_workers_decode_and_delivery_stays_in_order() {
        let source = source();
        let queue = Arc::new(OrderedBatchQueue::new(8));
        queue.set_start(0);
        let checkpoint = CheckpointStore::open(None).await.unwrap();
        let (batch_tx, batch_rx) = mpsc::channel(16);
        let batch_rx = Arc::new(Mutex::new(batch_rx));
        let (entry_tx, mut entry_rx) = mpsc::channel(64);
        let (shutdown_tx, _) = watch::channel(false);

        let closer = QueueCloser::new(Arc::clone(&queue));
        for _ in 0..3 {
            tokio::spawn(decode_worker(
                Arc::clone(&source),
                Arc::clone(&batch_rx),
                Arc::clone(&queue),
                Arc::clone(&closer),
            ));
        }
        drop(closer);

        let delivery = tokio::spawn(delivery_loop(
            Arc::clone(&source),
            Arc::clone(&queue),
            entry_tx,
            checkpoint.clone(),
            DecodeErrorPolicy::Refetch,
            shutdown_tx,
        ));

        for start in [0u64, 3, 6, 9] {
            batch_tx.send(raw_batch(start, start + 3)).await.unwrap();
        }
        drop(batch_tx);

        let mut indices = Vec::new();
        while let Some(entry) = entry_rx.recv().await {
            assert_eq!(entry.leaf_cert.all_domains[0], "example.com");
            indices.push(entry.index);
        }
        delivery.await.unwrap();

        assert_eq!(indices, (0..12).collect::<Vec<u64>>());
        assert_eq!(checkpoint.last_delivered(&source.url).await, Some(11));
    }

    #[tokio::test]
    async fn test_refetch_policy_holds_checkpoint_on_decode_errors() {
        let source = source();
        let queue = Arc::new(OrderedBatchQueue::new(8));
        queue.set_start(0);
        let checkpoint = CheckpointStore::open(None).await.unwrap();
        let (entry_tx, mut entry_rx) = mpsc::channel(64);
        let (shutdown_tx, _) = watch::channel(false);

        queue
            .push(0, 2, decode_batch(&source, raw_batch(0, 2)))
            .await;
        queue
            .push(2, 4, decode_batch(&source, garbage_batch(2, 4)))
            .await;
        queue
            .push(4, 6, decode_batch(&source, raw_batch(4, 6)))
            .await;
        queue.close();

        delivery_loop(
            Arc::clone(&source),
            queue,
            entry_tx,
            checkpoint.clone(),
            DecodeErrorPolicy::Refetch,
            shutdown_tx,
        )
        .await;

        let mut indices = Vec::new();
        while let Some(entry) = entry_rx.recv().await {
            indices.push(entry.index);
        }

        // Good entries around the bad batch are still delivered...
        assert_eq!(indices, vec![0, 1, 4, 5]);
        // ...but the checkpoint holds below the unconfirmed gap
        assert_eq!(checkpoint.last_delivered(&source.url).await, Some(1));
    }

    #[tokio::test]
    async fn test_skip_policy_confirms_decode_errors() {
        let source = source();
        let queue = Arc::new(OrderedBatchQueue::new(8));
        queue.set_start(0);
        let checkpoint = CheckpointStore::open(None).await.unwrap();
        let (entry_tx, mut entry_rx) = mpsc::channel(64);
        let (shutdown_tx, _) = watch::channel(false);

        queue
            .push(0, 2, decode_batch(&source, raw_batch(0, 2)))
            .await;
        queue
            .push(2, 4, decode_batch(&source, garbage_batch(2, 4)))
            .await;
        queue.close();

        delivery_loop(
            Arc::clone(&source),
            queue,
            entry_tx,
            checkpoint.clone(),
            DecodeErrorPolicy::Skip,
            shutdown_tx,
        )
        .await;

        while entry_rx.recv().await.is_some() {}

        assert_eq!(checkpoint.last_delivered(&source.url).await, Some(3));
    }

    #[tokio::test]
    async fn test_dropped_receiver_requests_stop() {
        let source = source();
        let queue = Arc::new(OrderedBatchQueue::new(8));
        queue.set_start(0);
        let checkpoint = CheckpointStore::open(None).await.unwrap();
        let (entry_tx, entry_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(entry_rx);

        queue
            .push(0, 2, decode_batch(&source, raw_batch(0, 2)))
            .await;
        queue.close();

        tokio::time::timeout(
            Duration::from_secs(1),
            delivery_loop(
                Arc::clone(&source),
                queue,
                entry_tx,
                checkpoint,
                DecodeErrorPolicy::Refetch,
                shutdown_tx,
            ),
        )
        .await
        .unwrap();

        assert!(*shutdown_rx.borrow());
    }
}
