// src/ct_log/log_list.rs
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info};

use super::types::{LogListV3, LogSource};
use crate::config::LogListConfig;

/// Discovery collaborator: resolves the set of CT logs to stream.
///
/// `custom_logs` replaces the public list entirely; otherwise Google's log
/// list v3 is fetched, filtered by state, and merged with `additional_logs`.
pub struct LogListFetcher {
    http_client: reqwest::Client,
}

impl LogListFetcher {
    pub fn new() -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { http_client })
    }

    /// Resolve the active log set for the given configuration.
    pub async fn discover(&self, config: &LogListConfig) -> Result<Vec<LogSource>> {
        if !config.custom_logs.is_empty() {
            let sources: Vec<LogSource> = config
                .custom_logs
                .iter()
                .map(|url| LogSource::from_url(url))
                .collect();
            info!("Using {} custom CT logs, skipping public list", sources.len());
            return Ok(sources);
        }

        let mut sources = self
            .fetch_public_list(&config.url, config.include_readonly, config.include_pending)
            .await?;

        for url in &config.additional_logs {
            if !url.is_empty() && !sources.iter().any(|s| &s.url == url) {
                info!("Adding additional log: {}", url);
                sources.push(LogSource::from_url(url));
            }
        }

        info!("Resolved {} CT logs to stream", sources.len());

        Ok(sources)
    }

    /// Fetch Google's log list and keep the logs acceptable under the
    /// configured state filters.
    async fn fetch_public_list(
        &self,
        list_url: &str,
        include_readonly: bool,
        include_pending: bool,
    ) -> Result<Vec<LogSource>> {
        info!("Fetching CT log list from {}", list_url);

        let response = self
            .http_client
            .get(list_url)
            .send()
            .await
            .context("Failed to fetch CT log list")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to fetch log list: HTTP {}", response.status());
        }

        let log_list: LogListV3 = response
            .json()
            .await
            .context("Failed to parse log list JSON")?;

        let mut sources = Vec::new();

        for operator in &log_list.operators {
            for log in &operator.logs {
                if log.url.is_empty() {
                    continue;
                }

                let acceptable = match &log.state {
                    Some(state) => state.is_acceptable(include_readonly, include_pending),
                    None => false,
                };

                if acceptable {
                    debug!("Found log: {} ({})", log.description, log.url);
                    let name = if log.description.is_empty() {
                        LogSource::from_url(&log.url).name
                    } else {
                        log.description.clone()
                    };
                    sources.push(LogSource::new(name, log.url.clone()));
                }
            }
        }

        info!(
            "Found {} acceptable CT logs (readonly={}, pending={})",
            sources.len(),
            include_readonly,
            include_pending
        );

        Ok(sources)
    }
}
