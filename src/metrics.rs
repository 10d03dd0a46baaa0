//! Prometheus metrics for certstream
//!
//! Provides observability into fetch progress, decode failures, and
//! checkpoint persistence. Operational failures surface here and in logs,
//! never through the entry stream.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts, Registry};
use tracing::warn;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Entries handed to the consumer
    /// Labels: log=<base url>
    pub static ref ENTRIES_DELIVERED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "certstream_entries_delivered_total",
            "Total number of entries delivered to the consumer"
        ),
        &["log"]
    ).expect("metric cannot be created");

    /// Completed get-entries ranges
    /// Labels: log=<base url>
    pub static ref BATCHES_FETCHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "certstream_batches_fetched_total",
            "Total number of completed entry ranges fetched from CT logs"
        ),
        &["log"]
    ).expect("metric cannot be created");

    /// Transient fetch failures (retried, never surfaced)
    /// Labels: log=<base url>
    pub static ref FETCH_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "certstream_fetch_errors_total",
            "Total number of transient CT log fetch errors"
        ),
        &["log"]
    ).expect("metric cannot be created");

    /// Entries whose leaf failed to decode
    /// Labels: log=<base url>
    pub static ref DECODE_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "certstream_decode_errors_total",
            "Total number of log entries that failed to decode"
        ),
        &["log"]
    ).expect("metric cannot be created");

    /// Checkpoint file writes
    /// Labels: status="success|failure"
    pub static ref CHECKPOINT_WRITES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "certstream_checkpoint_writes_total",
            "Total number of checkpoint file write attempts"
        ),
        &["status"]
    ).expect("metric cannot be created");
}

/// Register all metrics with the global registry
pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(ENTRIES_DELIVERED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BATCHES_FETCHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FETCH_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DECODE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CHECKPOINT_WRITES_TOTAL.clone()))?;

    Ok(())
}

/// Export metrics in Prometheus text format
pub fn export_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
