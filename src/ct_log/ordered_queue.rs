// src/ct_log/ordered_queue.rs
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::Notify;

struct Slot<T> {
    end: u64,
    batch: T,
}

struct QueueState<T> {
    /// Start index of the next batch to release; `None` until the fetcher
    /// has resolved its start position.
    next_expected: Option<u64>,
    ready: BTreeMap<u64, Slot<T>>,
    closed: bool,
}

/// Reorder stage between the decode workers and the delivery task.
///
/// Workers finish batches in arbitrary order when `num_workers > 1`; this
/// queue only releases the batch whose start index is next in line, so the
/// delivery task sees each log's entries in strictly increasing index order.
///
/// `push` blocks once `max_batches` are parked, except for the batch that is
/// itself next expected: holding that one out would deadlock the stage.
pub struct OrderedBatchQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    max_batches: usize,
}

impl<T> OrderedBatchQueue<T> {
    pub fn new(max_batches: usize) -> Self {
        assert!(max_batches > 0, "max_batches must be greater than zero");
        Self {
            state: Mutex::new(QueueState {
                next_expected: None,
                ready: BTreeMap::new(),
                closed: false,
            }),
            notify: Notify::new(),
            max_batches,
        }
    }

    /// Anchor the release order at the session's first fetched index.
    /// Called once by the fetcher before any batch is pushed.
    pub fn set_start(&self, start: u64) {
        let mut state = self.state.lock().unwrap();
        if state.next_expected.is_none() {
            state.next_expected = Some(start);
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Park a decoded batch covering `[start, end)` until its turn.
    /// Returns `false` if the queue has been closed.
    pub async fn push(&self, start: u64, end: u64, batch: T) -> bool {
        let mut pending = Some(batch);
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap();
                if state.closed {
                    return false;
                }
                let is_next_expected = state.next_expected == Some(start);
                if state.ready.len() < self.max_batches || is_next_expected {
                    let batch = pending.take().expect("batch is only enqueued once");
                    state.ready.insert(start, Slot { end, batch });
                    drop(state);
                    self.notify.notify_waiters();
                    return true;
                }
            }
            notified.await;
        }
    }

    /// Wait for the next in-order batch. Returns `None` once the queue is
    /// closed and no releasable batch remains; batches parked above a gap at
    /// close time are dropped, their indices stay unconfirmed.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap();
                if let Some(expected) = state.next_expected {
                    if let Some(slot) = state.ready.remove(&expected) {
                        state.next_expected = Some(slot.end);
                        drop(state);
                        self.notify.notify_waiters();
                        return Some(slot.batch);
                    }
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting batches and wake all waiters. Safe to call more than
    /// once; callable from `Drop` guards.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.notify.notify_waiters();
    }
}
