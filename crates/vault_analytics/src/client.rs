//! Vault query client: picks the backend for a chain, then scope, status
//! filter, ranking over the whole filtered set, and pagination.

use crate::analytics::{
    analyze_dormancy_risks, build_analytics_result, calculate_distribution,
    calculate_ecosystem_health, filter_vaults, get_vault_ranking, leaderboard,
    percentile_thresholds, AnalyticsResult, DisplaySort, DistributionReport, DormancyRisk,
    EcosystemHealth, Pagination, RankedVault, RankingOptions, RiskLevel, ScopeFilter, TierCutoff,
    VaultFilter,
};
use crate::chain::{
    Cache, DataSource, EventFilter, IndexedQueryAdapter, LiveLogAdapter, LiveLogConfig,
    RejectedRecord, RetryPolicy, TransportConfig,
};
use crate::config::protocol::ZERO_ADDRESS;
use crate::config::{BackendKind, ChainRegistry};
use crate::error::Error;
use crate::events::{Address, IndexedEvent, Vault};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

const CACHE_FILE: &str = "vault_analytics.sqlite";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub chain_id: u64,
    /// Response cache directory; `None` disables caching.
    pub cache_dir: Option<PathBuf>,
    pub transport: TransportConfig,
    pub retry: RetryPolicy,
    pub ranking: RankingOptions,
}

impl ClientConfig {
    pub fn for_chain(chain_id: u64) -> Self {
        Self {
            chain_id,
            cache_dir: None,
            transport: TransportConfig::default(),
            retry: RetryPolicy::default(),
            ranking: RankingOptions::default(),
        }
    }
}

/// Population selection plus presentation of one page.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultQuery {
    #[serde(default)]
    pub scope: ScopeFilter,
    #[serde(default)]
    pub filter: VaultFilter,
    #[serde(default)]
    pub sort: DisplaySort,
    #[serde(default)]
    pub pagination: Pagination,
}

pub struct VaultClient {
    source: DataSource,
    retry: RetryPolicy,
    ranking: RankingOptions,
    default_denomination: Address,
}

impl VaultClient {
    /// Build the backend configured for `config.chain_id`.
    pub fn new(config: ClientConfig, registry: &ChainRegistry) -> Result<Self, Error> {
        let chain = registry.get(config.chain_id)?;
        let cache = match &config.cache_dir {
            Some(dir) => Some(Arc::new(Cache::open(dir.join(CACHE_FILE))?)),
            None => None,
        };
        let source = match chain.backend {
            BackendKind::LiveLog => {
                let live = LiveLogConfig {
                    addresses: chain.log_addresses()?,
                    default_collateral_token: chain.default_collateral_token(),
                    deployment_block: chain.deployment_block,
                    ..Default::default()
                };
                DataSource::LiveLog(LiveLogAdapter::new(
                    chain.rpc_endpoint()?,
                    live,
                    config.transport.clone(),
                    cache,
                )?)
            }
            BackendKind::IndexedQuery => DataSource::IndexedQuery(IndexedQueryAdapter::new(
                chain.subgraph_endpoint()?,
                config.transport.clone(),
                cache,
            )?),
        };
        info!(chain = %chain.name, backend = %source.backend(), "vault client ready");
        Ok(Self {
            source,
            retry: config.retry,
            ranking: config.ranking,
            default_denomination: chain.default_collateral_token(),
        })
    }

    /// Wrap an already built source.
    pub fn with_source(source: DataSource) -> Self {
        Self {
            source,
            retry: RetryPolicy::default(),
            ranking: RankingOptions::default(),
            default_denomination: ZERO_ADDRESS.to_string(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ranking(mut self, ranking: RankingOptions) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_default_denomination(mut self, denomination: impl Into<Address>) -> Self {
        self.default_denomination = denomination.into();
        self
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    pub fn ranking(&self) -> &RankingOptions {
        &self.ranking
    }

    pub fn default_denomination(&self) -> &str {
        &self.default_denomination
    }

    fn log_rejected(&self, rejected: &[RejectedRecord]) {
        for r in rejected {
            warn!(backend = %self.source.backend(), error = %r.error, "skipping rejected record");
        }
    }

    /// Every vault in `scope`, unfiltered.
    pub async fn fetch_vaults(&self, scope: &ScopeFilter) -> Result<Vec<Vault>, Error> {
        let batch = self.retry.run(|| self.source.fetch_vaults(scope)).await?;
        self.log_rejected(&batch.rejected);
        debug!(vaults = batch.vaults.len(), "fetched vaults");
        Ok(batch.vaults)
    }

    pub async fn fetch_events(&self, filter: &EventFilter) -> Result<Vec<IndexedEvent>, Error> {
        let batch = self.retry.run(|| self.source.fetch_events(filter)).await?;
        self.log_rejected(&batch.rejected);
        debug!(events = batch.events.len(), "fetched events");
        Ok(batch.events)
    }

    async fn population(&self, query: &VaultQuery, now: u64) -> Result<Vec<Vault>, Error> {
        let vaults = self.fetch_vaults(&query.scope).await?;
        Ok(filter_vaults(vaults, &query.scope, &query.filter, now))
    }

    /// Ranked page with the client's ranking options.
    pub async fn get_vaults(&self, query: &VaultQuery, now: u64) -> Result<AnalyticsResult, Error> {
        self.get_analytics(query, &self.ranking, now).await
    }

    pub async fn get_analytics(
        &self,
        query: &VaultQuery,
        options: &RankingOptions,
        now: u64,
    ) -> Result<AnalyticsResult, Error> {
        let vaults = self.population(query, now).await?;
        Ok(build_analytics_result(vaults, options, query.sort, query.pagination))
    }

    /// The vault's entry ranked against everything in `scope`.
    pub async fn get_vault_ranking(
        &self,
        token_id: u128,
        scope: &ScopeFilter,
    ) -> Result<Option<RankedVault>, Error> {
        let vaults = self.fetch_vaults(scope).await?;
        Ok(get_vault_ranking(vaults, token_id, &self.ranking))
    }

    pub async fn leaderboard(&self, scope: &ScopeFilter, n: usize) -> Result<Vec<RankedVault>, Error> {
        let vaults = self.fetch_vaults(scope).await?;
        Ok(leaderboard(vaults, n, &self.ranking))
    }

    pub async fn percentile_thresholds(&self, query: &VaultQuery, now: u64) -> Result<Vec<TierCutoff>, Error> {
        let vaults = self.population(query, now).await?;
        Ok(percentile_thresholds(vaults, &self.ranking))
    }

    pub async fn get_distribution(&self, query: &VaultQuery, now: u64) -> Result<DistributionReport, Error> {
        let vaults = self.population(query, now).await?;
        calculate_distribution(vaults, &self.ranking, now)
    }

    pub async fn get_dormancy_risks(
        &self,
        query: &VaultQuery,
        min_level: RiskLevel,
        now: u64,
    ) -> Result<Vec<DormancyRisk>, Error> {
        let vaults = self.population(query, now).await?;
        Ok(analyze_dormancy_risks(&vaults, now, min_level))
    }

    /// Health over all vaults and the full event history.
    pub async fn get_ecosystem_health(&self, now: u64) -> Result<EcosystemHealth, Error> {
        let events = self.fetch_events(&EventFilter::default()).await?;
        let vaults = self.fetch_vaults(&ScopeFilter::All).await?;
        Ok(calculate_ecosystem_health(&events, &vaults, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{SortField, SortOrder, VestingFilter};
    use crate::chain::RecordedAdapter;
    use crate::config::protocol::VESTING_PERIOD;
    use crate::events::RawEvent;

    const TOKEN: &str = "0x00000000000000000000000000000000000000c0";
    const T0: u64 = 1_700_000_000;

    fn treasure(i: u64) -> String {
        format!("0x{:040x}", 0xb000 + i % 2)
    }

    fn mint(i: u64, collateral: u64, ts: u64) -> RawEvent {
        RawEvent::new("VaultMinted")
            .with("blockNumber", i)
            .with("blockTimestamp", ts)
            .with("transactionHash", format!("0x{i:064x}"))
            .with("logIndex", 0)
            .with("tokenId", i.to_string())
            .with("owner", format!("0x{:040x}", 0xa000 + i))
            .with("treasureContract", treasure(i))
            .with("treasureTokenId", i.to_string())
            .with("collateral", collateral.to_string())
    }

    fn client(n: u64) -> VaultClient {
        let records = (1..=n).map(|i| mint(i, i * 100, T0 + i)).collect();
        VaultClient::with_source(DataSource::Recorded(RecordedAdapter::from_records(records, TOKEN)))
            .with_retry(RetryPolicy::none())
    }

    #[tokio::test]
    async fn ranks_are_stable_across_pages() {
        let c = client(25);
        let now = T0 + 100;
        let mut all = Vec::new();
        for page in 1..=3 {
            let q = VaultQuery {
                pagination: Pagination { page, page_size: 10 },
                ..Default::default()
            };
            let r = c.get_vaults(&q, now).await.unwrap();
            assert_eq!(r.total, 25);
            assert_eq!(r.total_pages, 3);
            all.extend(r.vaults);
        }
        let one = c
            .get_vaults(
                &VaultQuery {
                    pagination: Pagination { page: 1, page_size: 100 },
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();
        assert_eq!(all, one.vaults);
        assert_eq!(one.vaults[0].vault.token_id, 25);
        assert_eq!(one.vaults[0].rank, 1);
    }

    #[tokio::test]
    async fn scope_ranks_within_the_scoped_population() {
        let c = client(20);
        let scope = ScopeFilter::Treasure(treasure(1).to_uppercase().replacen("0X", "0x", 1));
        let r = c.get_vault_ranking(19, &scope).await.unwrap().unwrap();
        assert_eq!(r.rank, 1);
        assert!(c.get_vault_ranking(20, &scope).await.unwrap().is_none());
        let top = c.leaderboard(&ScopeFilter::All, 3).await.unwrap();
        let ids: Vec<u128> = top.iter().map(|r| r.vault.token_id).collect();
        assert_eq!(ids, vec![20, 19, 18]);
    }

    #[tokio::test]
    async fn status_filter_runs_before_ranking() {
        let c = client(12);
        let now = T0 + 5 + VESTING_PERIOD;
        let q = VaultQuery {
            filter: VaultFilter {
                vesting: Some(VestingFilter::Vested),
                ..Default::default()
            },
            sort: DisplaySort {
                field: SortField::TokenId,
                order: SortOrder::Asc,
            },
            ..Default::default()
        };
        let r = c.get_vaults(&q, now).await.unwrap();
        assert_eq!(r.total, 5);
        assert!(r.insufficient_sample);
        assert!(r.vaults.iter().all(|v| v.tier.is_none()));
        assert_eq!(r.vaults[0].vault.token_id, 1);
        assert_eq!(r.vaults[0].rank, 5);
    }

    #[tokio::test]
    async fn health_and_distribution_from_recorded_log() {
        let c = client(4);
        let h = c.get_ecosystem_health(T0 + 10).await.unwrap();
        assert_eq!(h.mint_count, 4);
        assert_eq!(h.total_vaults, 4);
        assert_eq!(h.total_collateral, 1_000);
        let d = c.get_distribution(&VaultQuery::default(), T0 + 10).await.unwrap();
        assert_eq!(d.population, 4);
        assert_eq!(d.vesting.vesting_count, 4);
    }

    #[test]
    fn unknown_chain_is_rejected() {
        let err = VaultClient::new(ClientConfig::for_chain(999), &ChainRegistry::builtin())
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnsupportedChain(999)));
    }

    #[test]
    fn hosted_chain_without_addresses_still_builds_an_indexed_client() {
        let c = VaultClient::new(ClientConfig::for_chain(1), &ChainRegistry::builtin()).unwrap();
        assert_eq!(c.source().backend().kind, "indexed-query");
    }
}
