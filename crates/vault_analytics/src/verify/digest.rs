//! Export envelope and its SHA-256 content digest.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

/// Bumped when the envelope layout changes.
pub const EXPORT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported export version {0}")]
    Version(u32),
}

/// JSON export wrapper. `digest` covers `data` only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportEnvelope {
    pub kind: String,
    pub version: u32,
    pub digest: String,
    pub data: Value,
}

impl ExportEnvelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Result<Self, VerifyError> {
        Ok(Self {
            kind: kind.into(),
            version: EXPORT_VERSION,
            digest: report_digest(&data)?,
            data,
        })
    }
}

/// Sort object keys recursively and serialize without whitespace.
pub fn normalize_for_hash(value: &Value) -> Result<String, VerifyError> {
    Ok(serde_json::to_string(&sort_json_keys(value))?)
}

fn sort_json_keys(v: &Value) -> Value {
    match v {
        Value::Object(m) => {
            let sorted: BTreeMap<&String, Value> =
                m.iter().map(|(k, v)| (k, sort_json_keys(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_json_keys).collect()),
        other => other.clone(),
    }
}

/// Lowercase hex SHA-256 of the normalized JSON.
pub fn report_digest(data: &Value) -> Result<String, VerifyError> {
    let normalized = normalize_for_hash(data)?;
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerificationResult {
    pub kind: String,
    pub digest: String,
    pub expected: String,
    pub matches: bool,
}

/// Recompute the digest of an exported JSON envelope.
pub fn verify_export(bytes: &[u8]) -> Result<VerificationResult, VerifyError> {
    let envelope: ExportEnvelope = serde_json::from_slice(bytes)?;
    if envelope.version != EXPORT_VERSION {
        return Err(VerifyError::Version(envelope.version));
    }
    let digest = report_digest(&envelope.data)?;
    let expected = envelope.digest.trim().to_ascii_lowercase();
    Ok(VerificationResult {
        matches: digest == expected,
        kind: envelope.kind,
        digest,
        expected,
    })
}
