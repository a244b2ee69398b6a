//! Event schema, normalization, and log-derived vault state.

pub mod amount;
mod ledger;
mod normalize;
mod schema;

pub use amount::{format_units, parse_u128, parse_u64};
pub use ledger::{Closure, ClosureKind, VaultLedger};
pub use normalize::{
    normalize, normalize_address, normalize_hash, normalize_vault, RawEvent, RawVault, SchemaError,
};
pub use schema::{
    Address, DormancyState, EventKey, EventKind, EventMeta, EventType, IndexedEvent, OrderingKey,
    Vault,
};
