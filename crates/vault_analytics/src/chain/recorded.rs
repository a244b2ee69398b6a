//! Replay of a previously exported event log file.

use super::error::{AdapterError, Backend};
use super::{EventBatch, EventFilter, VaultBatch};
use crate::analytics::ScopeFilter;
use crate::events::{parse_u64, Address, RawEvent, VaultLedger};
use serde_json::Value;
use std::path::Path;
use tracing::info;

/// Serves events from memory. Accepts either a bare JSON array of event
/// records or an export envelope whose `data` is that array.
pub struct RecordedAdapter {
    backend: Backend,
    records: Vec<RawEvent>,
    default_collateral_token: Address,
}

impl RecordedAdapter {
    pub fn open(path: &Path, default_collateral_token: impl Into<Address>) -> Result<Self, AdapterError> {
        let backend = Backend::recorded(path.display());
        let text = std::fs::read_to_string(path).map_err(|source| AdapterError::Io {
            backend: backend.clone(),
            source,
        })?;
        let records = parse_records(&backend, &text)?;
        info!(path = %path.display(), records = records.len(), "loaded recorded events");
        Ok(Self {
            backend,
            records,
            default_collateral_token: default_collateral_token.into(),
        })
    }

    pub fn from_records(records: Vec<RawEvent>, default_collateral_token: impl Into<Address>) -> Self {
        Self {
            backend: Backend::recorded("memory"),
            records,
            default_collateral_token: default_collateral_token.into(),
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Highest block number among records that carry a readable one.
    pub fn head_block(&self) -> u64 {
        self.records
            .iter()
            .filter_map(|r| match r.fields.get("blockNumber")? {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => parse_u64("blockNumber", s).ok(),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    pub fn fetch_events(&self, filter: &EventFilter) -> EventBatch {
        EventBatch::from_raw(self.records.iter().cloned(), filter)
    }

    pub fn fetch_vaults(&self, scope: &ScopeFilter) -> VaultBatch {
        let batch = self.fetch_events(&EventFilter::default());
        let ledger = VaultLedger::replay(&batch.events, self.default_collateral_token.as_str());
        VaultBatch {
            vaults: ledger.vaults().into_iter().filter(|v| scope.matches(v)).collect(),
            rejected: batch.rejected,
        }
    }
}

fn parse_records(backend: &Backend, text: &str) -> Result<Vec<RawEvent>, AdapterError> {
    let value: Value = serde_json::from_str(text).map_err(|e| AdapterError::malformed(backend, e))?;
    let array = match value {
        Value::Array(_) => value,
        Value::Object(mut obj) => match obj.remove("data") {
            Some(data @ Value::Array(_)) => data,
            _ => return Err(AdapterError::malformed(backend, "envelope has no data array")),
        },
        _ => return Err(AdapterError::malformed(backend, "expected an array of events")),
    };
    serde_json::from_value(array).map_err(|e| AdapterError::malformed(backend, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TOKEN: &str = "0x00000000000000000000000000000000000000c0";

    fn mint(block: u64, token_id: u64, collateral: &str) -> Value {
        serde_json::json!({
            "type": "VaultMinted",
            "blockNumber": block.to_string(),
            "blockTimestamp": (1_700_000_000 + block).to_string(),
            "transactionHash": format!("0x{:064x}", block),
            "logIndex": 0,
            "tokenId": token_id.to_string(),
            "owner": "0x00000000000000000000000000000000000000a1",
            "treasureContract": "0x00000000000000000000000000000000000000b1",
            "treasureTokenId": "1",
            "collateral": collateral
        })
    }

    #[test]
    fn opens_bare_array_and_envelope() {
        let events = serde_json::json!([mint(3, 1, "100"), mint(9, 2, "50")]);
        let mut bare = NamedTempFile::new().unwrap();
        write!(bare, "{events}").unwrap();
        let a = RecordedAdapter::open(bare.path(), TOKEN).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a.head_block(), 9);
        assert_eq!(a.backend().kind, "recorded");

        let mut env = NamedTempFile::new().unwrap();
        write!(env, "{}", serde_json::json!({"kind": "events", "data": events})).unwrap();
        let b = RecordedAdapter::open(env.path(), TOKEN).unwrap();
        let vaults = b.fetch_vaults(&ScopeFilter::All).vaults;
        assert_eq!(vaults.len(), 2);
        assert_eq!(vaults[0].collateral_token, TOKEN);
    }

    #[test]
    fn missing_file_and_garbage_are_adapter_errors() {
        let err = RecordedAdapter::open(Path::new("/nonexistent/events.json"), TOKEN)
            .err()
            .unwrap();
        assert!(matches!(err, AdapterError::Io { .. }));

        let mut f = NamedTempFile::new().unwrap();
        write!(f, "{{\"kind\":\"events\"}}").unwrap();
        let err = RecordedAdapter::open(f.path(), TOKEN).err().unwrap();
        assert!(matches!(err, AdapterError::Malformed { .. }));
    }

    #[test]
    fn bad_records_are_rejected_not_fatal() {
        let mut bad = mint(4, 3, "1");
        bad["collateral"] = Value::from("-5");
        let records: Vec<RawEvent> =
            serde_json::from_value(serde_json::json!([mint(2, 1, "10"), bad])).unwrap();
        let a = RecordedAdapter::from_records(records, TOKEN);
        let batch = a.fetch_events(&EventFilter::default());
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.rejected.len(), 1);
    }
}
