//! Percentile ranking by collateral, tiers, and stable pagination.

use crate::config::protocol::MIN_VAULTS_FOR_PERCENTILE;
use crate::events::amount::decimal;
use crate::events::Vault;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Diamond,
    Platinum,
    Gold,
    Silver,
    Bronze,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Diamond,
        Tier::Platinum,
        Tier::Gold,
        Tier::Silver,
        Tier::Bronze,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Diamond => "diamond",
            Tier::Platinum => "platinum",
            Tier::Gold => "gold",
            Tier::Silver => "silver",
            Tier::Bronze => "bronze",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierThreshold {
    pub tier: Tier,
    pub min_percentile: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RankingOptions {
    /// Checked in order; the first threshold a percentile reaches wins.
    pub thresholds: Vec<TierThreshold>,
    /// Below this population size every tier is withheld.
    pub min_sample: usize,
}

impl Default for RankingOptions {
    fn default() -> Self {
        let t = |tier, min_percentile| TierThreshold {
            tier,
            min_percentile,
        };
        Self {
            thresholds: vec![
                t(Tier::Diamond, 99.0),
                t(Tier::Platinum, 95.0),
                t(Tier::Gold, 90.0),
                t(Tier::Silver, 75.0),
                t(Tier::Bronze, 50.0),
            ],
            min_sample: MIN_VAULTS_FOR_PERCENTILE,
        }
    }
}

impl RankingOptions {
    pub fn tier_for(&self, percentile: f64) -> Option<Tier> {
        self.thresholds
            .iter()
            .find(|t| percentile >= t.min_percentile)
            .map(|t| t.tier)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedVault {
    pub vault: Vault,
    pub rank: usize,
    pub percentile: f64,
    pub tier: Option<Tier>,
}

/// `(total - rank) / total * 100`; 0 for an empty population.
pub fn percentile(rank: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    total.saturating_sub(rank) as f64 * 100.0 / total as f64
}

/// Collateral descending, token id ascending.
fn rank_order(a: &Vault, b: &Vault) -> Ordering {
    b.collateral_amount
        .cmp(&a.collateral_amount)
        .then(a.token_id.cmp(&b.token_id))
}

/// Rank the whole population. Ranks are `1..=N` in rank order.
pub fn rank_vaults(mut vaults: Vec<Vault>, options: &RankingOptions) -> Vec<RankedVault> {
    vaults.sort_by(rank_order);
    let total = vaults.len();
    let show_tiers = total >= options.min_sample;
    vaults
        .into_iter()
        .enumerate()
        .map(|(i, vault)| {
            let rank = i + 1;
            let pct = percentile(rank, total);
            RankedVault {
                vault,
                rank,
                percentile: pct,
                tier: if show_tiers { options.tier_for(pct) } else { None },
            }
        })
        .collect()
}

pub fn get_vault_ranking(vaults: Vec<Vault>, token_id: u128, options: &RankingOptions) -> Option<RankedVault> {
    rank_vaults(vaults, options)
        .into_iter()
        .find(|r| r.vault.token_id == token_id)
}

/// Top `n` by rank.
pub fn leaderboard(vaults: Vec<Vault>, n: usize, options: &RankingOptions) -> Vec<RankedVault> {
    let mut ranked = rank_vaults(vaults, options);
    ranked.truncate(n);
    ranked
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    Collateral,
    MintTimestamp,
    TokenId,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collateral" => Ok(Self::Collateral),
            "mintTimestamp" | "mint_timestamp" | "mint" => Ok(Self::MintTimestamp),
            "tokenId" | "token_id" | "token" => Ok(Self::TokenId),
            other => Err(format!("unknown sort field: {other}")),
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(format!("unknown sort order: {other}")),
        }
    }
}

/// Display order applied after ranking. Never changes ranks or percentiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySort {
    pub field: SortField,
    pub order: SortOrder,
}

impl DisplaySort {
    pub fn apply(&self, ranked: &mut [RankedVault]) {
        let key = |r: &RankedVault| -> (u128, usize) {
            let v = &r.vault;
            let k = match self.field {
                SortField::Collateral => v.collateral_amount,
                SortField::MintTimestamp => u128::from(v.mint_timestamp),
                SortField::TokenId => v.token_id,
            };
            (k, r.rank)
        };
        match self.order {
            SortOrder::Asc => ranked.sort_by(|a, b| {
                let (ka, ra) = key(a);
                let (kb, rb) = key(b);
                ka.cmp(&kb).then(ra.cmp(&rb))
            }),
            SortOrder::Desc => ranked.sort_by(|a, b| {
                let (ka, ra) = key(a);
                let (kb, rb) = key(b);
                kb.cmp(&ka).then(ra.cmp(&rb))
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    /// Page and page size below 1 are raised to 1.
    pub fn clamped(self) -> Self {
        Self {
            page: self.page.max(1),
            page_size: self.page_size.max(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResult {
    pub vaults: Vec<RankedVault>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    /// Population below the minimum sample: tiers are all withheld.
    pub insufficient_sample: bool,
}

/// Rank the full filtered population, order for display, then cut one page.
pub fn build_analytics_result(
    vaults: Vec<Vault>,
    options: &RankingOptions,
    sort: DisplaySort,
    pagination: Pagination,
) -> AnalyticsResult {
    let Pagination { page, page_size } = pagination.clamped();
    let total = vaults.len();
    let mut ranked = rank_vaults(vaults, options);
    sort.apply(&mut ranked);
    let start = (page - 1).saturating_mul(page_size);
    let page_items: Vec<RankedVault> = ranked.into_iter().skip(start).take(page_size).collect();
    AnalyticsResult {
        vaults: page_items,
        total,
        page,
        page_size,
        total_pages: total.div_ceil(page_size),
        insufficient_sample: total < options.min_sample,
    }
}

/// Smallest collateral that reaches each tier in the current population.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierCutoff {
    pub tier: Tier,
    pub min_percentile: f64,
    #[serde(with = "decimal::option")]
    pub min_collateral: Option<u128>,
    pub vault_count: usize,
}

pub fn percentile_thresholds(vaults: Vec<Vault>, options: &RankingOptions) -> Vec<TierCutoff> {
    let ranked = rank_vaults(vaults, options);
    options
        .thresholds
        .iter()
        .map(|t| {
            let members: Vec<&RankedVault> = ranked.iter().filter(|r| r.tier == Some(t.tier)).collect();
            let reaching = ranked
                .iter()
                .filter(|r| r.tier.is_some() && r.percentile >= t.min_percentile)
                .map(|r| r.vault.collateral_amount)
                .min();
            TierCutoff {
                tier: t.tier,
                min_percentile: t.min_percentile,
                min_collateral: reaching,
                vault_count: members.len(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::status::tests::vault;

    fn population(n: u128) -> Vec<Vault> {
        (1..=n).map(|i| vault(i, i * 10)).collect()
    }

    #[test]
    fn ranks_are_a_permutation_and_percentile_non_increasing() {
        let ranked = rank_vaults(population(25), &RankingOptions::default());
        let ranks: Vec<usize> = ranked.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, (1..=25).collect::<Vec<_>>());
        assert!(ranked.windows(2).all(|w| w[0].percentile >= w[1].percentile));
        assert_eq!(ranked[0].vault.token_id, 25);
        assert!((ranked[0].percentile - 96.0).abs() < 1e-9);
    }

    #[test]
    fn ties_break_by_token_id_ascending() {
        let vaults = vec![vault(9, 50), vault(3, 50), vault(5, 70)];
        let ids: Vec<u128> = rank_vaults(vaults, &RankingOptions::default())
            .iter()
            .map(|r| r.vault.token_id)
            .collect();
        assert_eq!(ids, vec![5, 3, 9]);
    }

    #[test]
    fn small_population_withholds_tiers() {
        let ranked = rank_vaults(population(9), &RankingOptions::default());
        assert!(ranked.iter().all(|r| r.tier.is_none()));
        let result = build_analytics_result(
            population(9),
            &RankingOptions::default(),
            DisplaySort::default(),
            Pagination::default(),
        );
        assert!(result.insufficient_sample);
    }

    #[test]
    fn tier_table_applies_at_hundred() {
        let ranked = rank_vaults(population(100), &RankingOptions::default());
        assert_eq!(ranked[0].tier, Some(Tier::Diamond));
        assert_eq!(ranked[1].tier, Some(Tier::Platinum));
        assert_eq!(ranked[5].tier, Some(Tier::Gold));
        assert_eq!(ranked[10].tier, Some(Tier::Silver));
        assert_eq!(ranked[25].tier, Some(Tier::Bronze));
        assert_eq!(ranked[49].tier, Some(Tier::Bronze));
        assert_eq!(ranked[50].tier, None);
    }

    #[test]
    fn pages_are_independent_of_page_size() {
        let opts = RankingOptions::default();
        let whole = build_analytics_result(
            population(37),
            &opts,
            DisplaySort::default(),
            Pagination { page: 1, page_size: 37 },
        );
        for size in [1usize, 4, 10, 36] {
            let mut stitched = Vec::new();
            let mut page = 1;
            loop {
                let r = build_analytics_result(
                    population(37),
                    &opts,
                    DisplaySort::default(),
                    Pagination { page, page_size: size },
                );
                assert_eq!(r.total_pages, 37usize.div_ceil(size));
                if r.vaults.is_empty() {
                    break;
                }
                stitched.extend(r.vaults);
                page += 1;
            }
            assert_eq!(stitched, whole.vaults);
        }
    }

    #[test]
    fn pagination_clamps_and_past_end_is_empty() {
        let r = build_analytics_result(
            population(5),
            &RankingOptions::default(),
            DisplaySort::default(),
            Pagination { page: 0, page_size: 0 },
        );
        assert_eq!((r.page, r.page_size, r.vaults.len(), r.total_pages), (1, 1, 1, 5));
        let past = build_analytics_result(
            population(5),
            &RankingOptions::default(),
            DisplaySort::default(),
            Pagination { page: 9, page_size: 2 },
        );
        assert!(past.vaults.is_empty());
        assert_eq!(past.total, 5);
    }

    #[test]
    fn display_sort_keeps_ranks() {
        let mut ranked = rank_vaults(population(12), &RankingOptions::default());
        DisplaySort {
            field: SortField::TokenId,
            order: SortOrder::Asc,
        }
        .apply(&mut ranked);
        assert_eq!(ranked[0].vault.token_id, 1);
        assert_eq!(ranked[0].rank, 12);
        assert_eq!(ranked[11].rank, 1);
    }

    #[test]
    fn lookups_and_cutoffs() {
        let opts = RankingOptions::default();
        let r = get_vault_ranking(population(20), 18, &opts).unwrap();
        assert_eq!(r.rank, 3);
        assert!(get_vault_ranking(population(20), 99, &opts).is_none());
        assert_eq!(leaderboard(population(20), 3, &opts).len(), 3);

        let cutoffs = percentile_thresholds(population(100), &opts);
        let diamond = &cutoffs[0];
        assert_eq!(diamond.tier, Tier::Diamond);
        assert_eq!(diamond.min_collateral, Some(1000));
        assert_eq!(diamond.vault_count, 1);
        let bronze = &cutoffs[4];
        assert_eq!(bronze.min_collateral, Some(510));

        let small = percentile_thresholds(population(3), &opts);
        assert!(small.iter().all(|c| c.min_collateral.is_none()));
    }
}
