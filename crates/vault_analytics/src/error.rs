//! Crate-level error taxonomy.

use crate::chain::{AdapterError, CacheError};
use crate::conservation::ConservationReport;
use crate::events::SchemaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported chain id {0}")]
    UnsupportedChain(u64),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("cache: {0}")]
    Cache(#[from] CacheError),
    #[error("schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("chain {chain_id}: {what} is not configured")]
    NotConfigured { chain_id: u64, what: String },
    #[error("{what} overflows 128 bits")]
    Overflow { what: &'static str },
    #[error("conservation violated: {} discrepancies", .0.violations.len())]
    ConservationViolation(Box<ConservationReport>),
}
