// src/ct_log/types.rs
use serde::{Deserialize, Serialize};

/// Identity of one CT log. Immutable once discovered; the coordinator owns
/// the set of sources for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSource {
    pub name: String,
    /// Base URL of the log; doubles as its identity in checkpoints.
    pub url: String,
}

impl LogSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    /// Build a source for a log known only by URL (custom/additional logs).
    /// The name is derived from the host and path.
    pub fn from_url(url: &str) -> Self {
        let name = match url::Url::parse(url) {
            Ok(parsed) => {
                let host = parsed.host_str().unwrap_or(url);
                let path = parsed.path().trim_matches('/');
                if path.is_empty() {
                    host.to_string()
                } else {
                    format!("{}/{}", host, path)
                }
            }
            Err(_) => url.to_string(),
        };
        Self {
            name,
            url: url.to_string(),
        }
    }
}

/// Unparsed entries returned for one contiguous `[start, end)` index range.
/// Handed from the fetcher to exactly one decode worker.
#[derive(Debug)]
pub struct RawBatch {
    pub start: u64,
    pub end: u64,
    pub entries: Vec<LogEntry>,
}

/// Response from a CT log's get-sth endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTreeHead {
    pub tree_size: u64,
    pub timestamp: u64,
    pub sha256_root_hash: String,
    #[serde(default)]
    pub tree_head_signature: String,
}

/// Single entry from a CT log's get-entries endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub leaf_input: String, // base64-encoded MerkleTreeLeaf
    pub extra_data: String, // base64-encoded certificate chain
}

/// Response wrapper for the get-entries endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct GetEntriesResponse {
    pub entries: Vec<LogEntry>,
}

/// Google's CT log list V3 format
#[derive(Debug, Serialize, Deserialize)]
pub struct LogListV3 {
    pub operators: Vec<Operator>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Operator {
    pub name: String,
    #[serde(default)]
    pub email: Vec<String>,
    #[serde(default)]
    pub logs: Vec<LogInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogInfo {
    #[serde(default)]
    pub description: String,
    pub log_id: Option<String>,
    pub key: Option<String>,
    #[serde(default)]
    pub url: String,
    pub mmd: Option<u64>,
    #[serde(default)]
    pub state: Option<StateWrapper>,
    pub temporal_interval: Option<TemporalInterval>,
}

/// State wrapper that can contain different state types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateWrapper {
    #[serde(default)]
    pub usable: Option<StateTimestamp>,
    #[serde(default)]
    pub readonly: Option<StateTimestamp>,
    #[serde(default)]
    pub retired: Option<StateTimestamp>,
    #[serde(default)]
    pub rejected: Option<StateTimestamp>,
    #[serde(default)]
    pub qualified: Option<StateTimestamp>,
    #[serde(default)]
    pub pending: Option<StateTimestamp>,
}

impl StateWrapper {
    /// Log is actively accepting new entries.
    pub fn is_usable(&self) -> bool {
        self.usable.is_some() || self.qualified.is_some()
    }

    /// Log is frozen but may still hold recent entries.
    pub fn is_readonly(&self) -> bool {
        self.readonly.is_some()
    }

    /// Log is not yet in service.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Check if the log should be streamed given the list configuration.
    pub fn is_acceptable(&self, include_readonly: bool, include_pending: bool) -> bool {
        self.is_usable()
            || (include_readonly && self.is_readonly())
            || (include_pending && self.is_pending())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTimestamp {
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalInterval {
    pub start_inclusive: Option<String>,
    pub end_exclusive: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_name_from_url() {
        let source = LogSource::from_url("https://ct.googleapis.com/logs/us1/argon2026h1/");
        assert_eq!(source.name, "ct.googleapis.com/logs/us1/argon2026h1");
        assert_eq!(source.url, "https://ct.googleapis.com/logs/us1/argon2026h1/");

        let bare = LogSource::from_url("https://ct.example.com/");
        assert_eq!(bare.name, "ct.example.com");
    }

    #[test]
    fn test_state_filtering() {
        let usable = StateWrapper {
            usable: Some(StateTimestamp {
                timestamp: "2024-01-01T00:00:00Z".to_string(),
            }),
            readonly: None,
            retired: None,
            rejected: None,
            qualified: None,
            pending: None,
        };
        assert!(usable.is_acceptable(false, false));

        let readonly = StateWrapper {
            usable: None,
            readonly: Some(StateTimestamp {
                timestamp: "2024-01-01T00:00:00Z".to_string(),
            }),
            retired: None,
            rejected: None,
            qualified: None,
            pending: None,
        };
        assert!(!readonly.is_acceptable(false, false));
        assert!(readonly.is_acceptable(true, false));
    }
}
