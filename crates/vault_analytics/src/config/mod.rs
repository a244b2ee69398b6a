//! Chain registry and protocol constants.

mod chains;
pub mod protocol;

pub use chains::{BackendKind, ChainConfig, ChainOverride, ChainRegistry, ConfigFile};
