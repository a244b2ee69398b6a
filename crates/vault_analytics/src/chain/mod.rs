//! Data-source adapters: live node logs, hosted indexing service, recorded files.
//!
//! Every backend answers the same two questions (events in a block range,
//! current vaults) and none of them retries on its own.

pub mod abi;
mod cache;
mod error;
mod indexed;
mod live_log;
mod recorded;
mod retry;
mod transport;

pub use cache::{Cache, CacheError};
pub use error::{AdapterError, Backend};
pub use indexed::IndexedQueryAdapter;
pub use live_log::{LiveLogAdapter, LiveLogConfig};
pub use recorded::RecordedAdapter;
pub use retry::RetryPolicy;
pub use transport::{HttpTransport, TransportConfig};

use crate::analytics::ScopeFilter;
use crate::events::{normalize, Address, EventType, IndexedEvent, RawEvent, SchemaError, Vault};
use serde::Serialize;

/// Selection of events by type, block range, vault and address.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Empty means every type.
    pub types: Vec<EventType>,
    pub from_block: u64,
    /// Inclusive. `None` means up to the current head.
    pub to_block: Option<u64>,
    pub token_id: Option<u128>,
    pub address: Option<Address>,
}

impl EventFilter {
    pub fn range(from_block: u64, to_block: Option<u64>) -> Self {
        Self {
            from_block,
            to_block,
            ..Default::default()
        }
    }

    pub fn with_types(mut self, types: &[EventType]) -> Self {
        self.types = types.to_vec();
        self
    }

    pub fn matches(&self, ev: &IndexedEvent) -> bool {
        let block = ev.meta.block_number;
        if block < self.from_block || self.to_block.is_some_and(|to| block > to) {
            return false;
        }
        if !self.types.is_empty() && !self.types.contains(&ev.event_type()) {
            return false;
        }
        if let Some(id) = self.token_id {
            if ev.token_id() != Some(id) {
                return false;
            }
        }
        if let Some(addr) = &self.address {
            if !ev
                .kind
                .addresses()
                .iter()
                .any(|a| a.eq_ignore_ascii_case(addr))
            {
                return false;
            }
        }
        true
    }
}

/// A raw record the normalizer refused, kept for the caller to inspect.
#[derive(Clone, Debug, Serialize)]
pub struct RejectedRecord {
    #[serde(serialize_with = "serialize_display")]
    pub error: SchemaError,
    pub raw: serde_json::Value,
}

fn serialize_display<S: serde::Serializer>(e: &SchemaError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(e)
}

/// Events in ascending ordering-key order, plus anything that failed validation.
#[derive(Clone, Debug, Default)]
pub struct EventBatch {
    pub events: Vec<IndexedEvent>,
    pub rejected: Vec<RejectedRecord>,
}

impl EventBatch {
    /// Normalize raw records, keep those matching `filter`, sort by ordering key.
    pub fn from_raw(records: impl IntoIterator<Item = RawEvent>, filter: &EventFilter) -> Self {
        let mut batch = Self::default();
        for raw in records {
            match normalize(&raw) {
                Ok(ev) if filter.matches(&ev) => batch.events.push(ev),
                Ok(_) => {}
                Err(error) => batch.rejected.push(RejectedRecord {
                    error,
                    raw: serde_json::to_value(&raw).unwrap_or_default(),
                }),
            }
        }
        batch.events.sort_by_key(IndexedEvent::ordering_key);
        batch
    }
}

#[derive(Clone, Debug, Default)]
pub struct VaultBatch {
    pub vaults: Vec<Vault>,
    pub rejected: Vec<RejectedRecord>,
}

/// The backends behind one fetch contract.
pub enum DataSource {
    LiveLog(LiveLogAdapter),
    IndexedQuery(IndexedQueryAdapter),
    Recorded(RecordedAdapter),
}

impl DataSource {
    pub fn backend(&self) -> Backend {
        match self {
            Self::LiveLog(a) => a.backend().clone(),
            Self::IndexedQuery(a) => a.backend().clone(),
            Self::Recorded(a) => a.backend().clone(),
        }
    }

    /// Fail fast when the backend cannot make progress.
    pub async fn precheck(&self) -> Result<(), AdapterError> {
        match self {
            Self::LiveLog(a) => a.precheck().await,
            Self::IndexedQuery(a) => a.head_block().await.map(|_| ()),
            Self::Recorded(_) => Ok(()),
        }
    }

    pub async fn head_block(&self) -> Result<u64, AdapterError> {
        match self {
            Self::LiveLog(a) => a.block_number().await,
            Self::IndexedQuery(a) => a.head_block().await,
            Self::Recorded(a) => Ok(a.head_block()),
        }
    }

    /// Events matching `filter`, ascending by ordering key. Restartable from
    /// any `from_block`.
    pub async fn fetch_events(&self, filter: &EventFilter) -> Result<EventBatch, AdapterError> {
        match self {
            Self::LiveLog(a) => a.fetch_events(filter).await,
            Self::IndexedQuery(a) => a.fetch_events(filter).await,
            Self::Recorded(a) => Ok(a.fetch_events(filter)),
        }
    }

    pub async fn fetch_vaults(&self, scope: &ScopeFilter) -> Result<VaultBatch, AdapterError> {
        match self {
            Self::LiveLog(a) => a.fetch_vaults(scope).await,
            Self::IndexedQuery(a) => a.fetch_vaults(scope).await,
            Self::Recorded(a) => Ok(a.fetch_vaults(scope)),
        }
    }
}
