//! vault_analytics: read-side indexing and analytics for collateral vaults.
//!
//! Ingests vault contract events from a node, an indexed query service, or a
//! recorded log; ranks, aggregates and audits them. Read-only; no keys; no
//! transaction signing.

pub mod analytics;
pub mod chain;
pub mod client;
pub mod config;
pub mod conservation;
pub mod error;
pub mod events;
pub mod indexer;
pub mod verify;

pub use analytics::{
    AnalyticsResult, CohortAnalysis, CohortId, DistributionReport, DormancyRisk, EcosystemHealth,
    RankedVault, RankingOptions, RetentionMatrix, ScopeFilter, TimeSeries, VaultFilter,
};
pub use chain::{DataSource, EventFilter, RetryPolicy};
pub use client::{ClientConfig, VaultClient, VaultQuery};
pub use config::ChainRegistry;
pub use conservation::{calculate_conservation, ConservationReport, GhostVariables};
pub use error::Error;
pub use events::{IndexedEvent, Vault};
pub use indexer::{Indexer, IndexerConfig};
pub use verify::{report_digest, verify_export, ExportEnvelope};
