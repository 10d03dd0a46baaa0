// src/ct_log/health.rs
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Health status of a CT log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogHealth {
    /// Responding normally
    Healthy,
    /// Some failures, still polled at the normal cadence
    Degraded,
    /// Repeated failures, polls gated by exponential backoff
    Failed,
}

#[derive(Debug, Clone)]
struct LogHealthInfo {
    status: LogHealth,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_error: Option<String>,
    current_backoff: Duration,
}

impl LogHealthInfo {
    fn new() -> Self {
        Self {
            status: LogHealth::Healthy,
            failure_count: 0,
            last_failure: None,
            last_error: None,
            current_backoff: Duration::ZERO,
        }
    }

    /// Exponential backoff: 1 minute doubling up to 1 hour.
    fn next_backoff(&self) -> Duration {
        if self.failure_count == 0 {
            Duration::ZERO
        } else {
            let exp = self.failure_count.saturating_sub(1).min(6);
            Duration::from_secs((60 * 2_u64.pow(exp)).min(3600))
        }
    }
}

/// Tracks per-log failure streaks so that a broken log backs off its STH
/// polls instead of hammering a dead endpoint.
pub struct LogHealthTracker {
    health: RwLock<HashMap<String, LogHealthInfo>>,
    failure_threshold: u32,
}

impl LogHealthTracker {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            health: RwLock::new(HashMap::new()),
            failure_threshold,
        }
    }

    pub async fn record_success(&self, log_url: &str) {
        let mut health = self.health.write().await;
        let info = health
            .entry(log_url.to_string())
            .or_insert_with(LogHealthInfo::new);

        if info.status == LogHealth::Failed {
            info!("Log recovered: {} is now healthy", log_url);
        }

        info.status = LogHealth::Healthy;
        info.failure_count = 0;
        info.current_backoff = Duration::ZERO;
    }

    pub async fn record_failure(&self, log_url: &str, error: String) {
        let mut health = self.health.write().await;
        let info = health
            .entry(log_url.to_string())
            .or_insert_with(LogHealthInfo::new);

        info.failure_count += 1;
        info.last_failure = Some(Instant::now());
        info.last_error = Some(error.clone());

        let old_status = info.status;
        info.status = if info.failure_count >= self.failure_threshold {
            LogHealth::Failed
        } else {
            LogHealth::Degraded
        };
        info.current_backoff = info.next_backoff();

        match (old_status, info.status) {
            (LogHealth::Healthy, LogHealth::Degraded) => {
                warn!(
                    "Log degraded: {} (failure {}/{}): {}",
                    log_url, info.failure_count, self.failure_threshold, error
                );
            }
            (_, LogHealth::Failed) if old_status != LogHealth::Failed => {
                warn!(
                    "Log failed: {} (after {} failures, backoff {:?}): {}",
                    log_url, info.failure_count, info.current_backoff, error
                );
            }
            _ => {
                debug!(
                    "Log still failing: {} (failure {}, backoff {:?}): {}",
                    log_url, info.failure_count, info.current_backoff, error
                );
            }
        }
    }

    /// Whether the log should be polled now. Failed logs wait out their
    /// backoff window; everything else polls at the normal cadence.
    pub async fn should_poll(&self, log_url: &str) -> bool {
        let health = self.health.read().await;
        let Some(info) = health.get(log_url) else {
            return true;
        };

        match info.status {
            LogHealth::Healthy | LogHealth::Degraded => true,
            LogHealth::Failed => info
                .last_failure
                .map(|at| at.elapsed() >= info.current_backoff)
                .unwrap_or(true),
        }
    }

    pub async fn get_status(&self, log_url: &str) -> LogHealth {
        let health = self.health.read().await;
        health
            .get(log_url)
            .map(|info| info.status)
            .unwrap_or(LogHealth::Healthy)
    }

    /// Emit a one-line health summary, with details for failed logs.
    pub async fn log_summary(&self) {
        let health = self.health.read().await;
        if health.is_empty() {
            return;
        }

        let mut healthy = 0;
        let mut degraded = 0;
        let mut failed = 0;
        for info in health.values() {
            match info.status {
                LogHealth::Healthy => healthy += 1,
                LogHealth::Degraded => degraded += 1,
                LogHealth::Failed => failed += 1,
            }
        }

        info!(
            "Log health summary: {} total ({} healthy, {} degraded, {} failed)",
            health.len(),
            healthy,
            degraded,
            failed
        );

        for (url, info) in health.iter() {
            if info.status == LogHealth::Failed {
                if let Some(ref error) = info.last_error {
                    warn!(
                        "Failed log: {} - {} failures, backoff {:?}, last error: {}",
                        url, info.failure_count, info.current_backoff, error
                    );
                }
            }
        }
    }
}

impl Default for LogHealthTracker {
    fn default() -> Self {
        Self::new(3)
    }
}
