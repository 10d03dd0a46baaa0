// src/cert_parser.rs
use anyhow::{Context, Result};
use base64::Engine;
use sha2::{Digest, Sha256};
use x509_parser::extensions::ParsedExtension;
use x509_parser::prelude::*;

use crate::types::{EntryKind, LeafCert};

/// Decoded leaf of one CT log entry.
#[derive(Debug, Clone)]
pub struct DecodedLeaf {
    pub kind: EntryKind,
    pub leaf: LeafCert,
}

/// Decode one RFC 6962 log entry into its certificate payload.
///
/// The `leaf_input` MerkleTreeLeaf carries the entry type; x509 entries carry
/// the certificate inline, precert entries carry only the TBSCertificate, so
/// the full precertificate is taken from `extra_data` instead.
pub fn decode_log_entry(leaf_input_b64: &str, extra_data_b64: &str) -> Result<DecodedLeaf> {
    let leaf_bytes = base64::engine::general_purpose::STANDARD
        .decode(leaf_input_b64)
        .context("Failed to decode base64 leaf_input")?;

    // MerkleTreeLeaf: version(1) + leaf_type(1) + timestamp(8) + entry_type(2)
    if leaf_bytes.len() < 12 {
        anyhow::bail!("Leaf input too short: {} bytes", leaf_bytes.len());
    }

    let entry_type = ((leaf_bytes[10] as u16) << 8) | (leaf_bytes[11] as u16);

    match entry_type {
        0 => {
            // x509_entry: 3-byte length + certificate DER at offset 15
            if leaf_bytes.len() < 15 {
                anyhow::bail!("x509_entry too short");
            }

            let cert_len = ((leaf_bytes[12] as usize) << 16)
                | ((leaf_bytes[13] as usize) << 8)
                | (leaf_bytes[14] as usize);

            let end = std::cmp::min(15 + cert_len, leaf_bytes.len());
            let leaf = extract_leaf(&leaf_bytes[15..end])?;

            Ok(DecodedLeaf {
                kind: EntryKind::X509LogEntry,
                leaf,
            })
        }
        1 => {
            // precert_entry: leaf_input holds only the TBSCertificate, the
            // full poisoned precertificate leads extra_data
            let extra_bytes = base64::engine::general_purpose::STANDARD
                .decode(extra_data_b64)
                .context("Failed to decode base64 extra_data")?;

            if extra_bytes.len() < 3 {
                anyhow::bail!("extra_data too short for precert_entry");
            }

            let precert_len = ((extra_bytes[0] as usize) << 16)
                | ((extra_bytes[1] as usize) << 8)
                | (extra_bytes[2] as usize);

            if extra_bytes.len() < 3 + precert_len {
                anyhow::bail!("extra_data truncated: expected {} bytes", 3 + precert_len);
            }

            let leaf = extract_leaf(&extra_bytes[3..3 + precert_len])?;

            Ok(DecodedLeaf {
                kind: EntryKind::PrecertLogEntry,
                leaf,
            })
        }
        other => anyhow::bail!("Unknown entry type: {}", other),
    }
}

/// Extract domains, validity window, fingerprint and issuer from DER bytes.
fn extract_leaf(der_bytes: &[u8]) -> Result<LeafCert> {
    let fingerprint = {
        let mut hasher = Sha256::new();
        hasher.update(der_bytes);
        hex::encode(hasher.finalize())
    };

    let (_, cert) = X509Certificate::from_der(der_bytes)
        .map_err(|e| anyhow::anyhow!("Failed to parse certificate from DER: {:?}", e))?;

    let mut all_domains = Vec::new();

    for ext in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
            for general_name in &san.general_names {
                if let GeneralName::DNSName(dns_name) = general_name {
                    all_domains.push(dns_name.to_string());
                }
            }
        }
    }

    // Certificates without a SAN fall back to the subject CN
    if all_domains.is_empty() {
        if let Some(cn) = common_name(cert.subject()) {
            all_domains.push(cn);
        }
    }

    Ok(LeafCert {
        all_domains,
        not_before: Some(cert.validity().not_before.timestamp()),
        not_after: Some(cert.validity().not_after.timestamp()),
        fingerprint,
        issuer: common_name(cert.issuer()).or_else(|| Some(cert.issuer().to_string())),
    })
}

fn common_name(name: &X509Name) -> Option<String> {
    for rdn in name.iter() {
        for attr in rdn.iter() {
            if attr.attr_type() == &oid_registry::OID_X509_COMMON_NAME {
                if let Ok(cn) = attr.attr_value().as_str() {
                    return Some(cn.to_string());
                }
            }
        }
    }
    None
}
