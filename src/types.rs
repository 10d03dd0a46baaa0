// src/types.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a CT log entry, from the MerkleTreeLeaf entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    X509LogEntry,
    PrecertLogEntry,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::X509LogEntry => write!(f, "x509_entry"),
            EntryKind::PrecertLogEntry => write!(f, "precert_entry"),
        }
    }
}

/// Leaf certificate fields extracted by the decode stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafCert {
    pub all_domains: Vec<String>,

    #[serde(rename = "not_before")]
    pub not_before: Option<i64>,

    #[serde(rename = "not_after")]
    pub not_after: Option<i64>,

    pub fingerprint: String,

    pub issuer: Option<String>,
}

/// One decoded certificate record as handed to the consumer.
///
/// Entries are immutable after construction; ownership transfers to the
/// consumer when read from the delivery channel. Within a session the same
/// `(source_url, index)` pair is never constructed twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Human-readable name of the originating log.
    pub source_name: String,

    /// Base URL of the originating log; the log's identity.
    pub source_url: String,

    /// Index of this entry within its log.
    #[serde(rename = "cert_index")]
    pub index: u64,

    pub kind: EntryKind,

    pub leaf_cert: LeafCert,

    /// Unix timestamp at which this entry was decoded.
    #[serde(rename = "seen")]
    pub seen_unix: f64,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}#{}", self.kind, self.source_url, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> Entry {
        Entry {
            source_name: "Test Log".to_string(),
            source_url: "https://ct.example.com/2025/".to_string(),
            index: 42,
            kind: EntryKind::X509LogEntry,
            leaf_cert: LeafCert {
                all_domains: vec!["example.com".to_string(), "www.example.com".to_string()],
                not_before: Some(1600000000),
                not_after: Some(1700000000),
                fingerprint: "aabbcc".to_string(),
                issuer: Some("Test CA".to_string()),
            },
            seen_unix: 1234567890.5,
        }
    }

    #[test]
    fn test_entry_serializes_with_wire_names() {
        let entry = sample_entry();
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["cert_index"], 42);
        assert_eq!(json["seen"], 1234567890.5);
        assert_eq!(json["kind"], "x509_log_entry");
        assert_eq!(json["leaf_cert"]["all_domains"][0], "example.com");
    }

    #[test]
    fn test_entry_roundtrip() {
        let entry = sample_entry();
        let json = serde_json::to_string(&entry).unwrap();
        let back: Entry = serde_json::from_str(&json).unwrap();

        assert_eq!(back.index, entry.index);
        assert_eq!(back.kind, entry.kind);
        assert_eq!(back.leaf_cert.all_domains, entry.leaf_cert.all_domains);
    }

    #[test]
    fn test_display() {
        let entry = sample_entry();
        let s = entry.to_string();
        assert!(s.contains("x509_entry"));
        assert!(s.contains("#42"));
    }
}
