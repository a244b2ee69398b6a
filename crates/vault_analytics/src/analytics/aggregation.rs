//! Portfolio statistics and distributions over a filtered vault population.
//!
//! Percentages are taken against the size of the population passed in, so a
//! filtered set reports shares of itself.

use super::ranking::{rank_vaults, RankedVault, RankingOptions, Tier};
use super::status::{dormancy_state, is_vested};
use crate::config::protocol::{ONE_BTC, SECONDS_PER_DAY, VESTING_PERIOD};
use crate::error::Error;
use crate::events::amount::decimal;
use crate::events::{DormancyState, Vault};
use serde::Serialize;
use std::collections::HashSet;

/// Upper bounds of the collateral buckets in satoshis. The last bucket is open.
const BUCKET_BOUNDS: [(u128, &str); 5] = [
    (ONE_BTC / 10, "<0.1"),
    (ONE_BTC / 2, "<0.5"),
    (ONE_BTC, "<1"),
    (5 * ONE_BTC, "<5"),
    (10 * ONE_BTC, "<10"),
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollateralBucket {
    /// BTC range label, e.g. `<0.5` or `>=10`.
    pub label: &'static str,
    pub count: usize,
    #[serde(with = "decimal")]
    pub total: u128,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioStats {
    pub total_vaults: usize,
    #[serde(with = "decimal")]
    pub total_collateral: u128,
    #[serde(with = "decimal")]
    pub average_collateral: u128,
    #[serde(with = "decimal")]
    pub median_collateral: u128,
    #[serde(with = "decimal")]
    pub standard_deviation: u128,
    pub unique_holders: usize,
    /// Empty when there are no vaults.
    pub buckets: Vec<CollateralBucket>,
}

/// Floor of the square root.
fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let mut x = n;
    let mut y = x / 2 + x % 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

fn share(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn checked_sum(mut values: impl Iterator<Item = u128>, what: &'static str) -> Result<u128, Error> {
    values
        .try_fold(0u128, u128::checked_add)
        .ok_or(Error::Overflow { what })
}

/// Fails with `Error::Overflow` when the collateral total or the sum of
/// squared deviations does not fit in `u128`. Group and bucket totals are
/// subsets of the checked total.
pub fn portfolio_stats(vaults: &[Vault]) -> Result<PortfolioStats, Error> {
    if vaults.is_empty() {
        return Ok(PortfolioStats::default());
    }
    let n = vaults.len() as u128;
    let total = checked_sum(vaults.iter().map(|v| v.collateral_amount), "total collateral")?;
    let average = total / n;

    let mut sorted: Vec<u128> = vaults.iter().map(|v| v.collateral_amount).collect();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        sorted[mid - 1] / 2 + sorted[mid] / 2 + (sorted[mid - 1] % 2 + sorted[mid] % 2) / 2
    } else {
        sorted[mid]
    };

    let squares = sorted
        .iter()
        .map(|&c| {
            let d = c.abs_diff(average);
            d.checked_mul(d).ok_or(Error::Overflow {
                what: "squared deviation",
            })
        })
        .collect::<Result<Vec<u128>, Error>>()?;
    let variance = checked_sum(squares.into_iter(), "sum of squared deviations")? / n;

    let unique_holders = vaults
        .iter()
        .map(|v| v.owner.to_ascii_lowercase())
        .collect::<HashSet<_>>()
        .len();

    let mut buckets: Vec<CollateralBucket> = BUCKET_BOUNDS
        .iter()
        .map(|&(_, label)| CollateralBucket {
            label,
            count: 0,
            total: 0,
        })
        .chain(std::iter::once(CollateralBucket {
            label: ">=10",
            count: 0,
            total: 0,
        }))
        .collect();
    for &c in &sorted {
        let idx = BUCKET_BOUNDS
            .iter()
            .position(|&(bound, _)| c < bound)
            .unwrap_or(BUCKET_BOUNDS.len());
        buckets[idx].count += 1;
        buckets[idx].total += c;
    }

    Ok(PortfolioStats {
        total_vaults: vaults.len(),
        total_collateral: total,
        average_collateral: average,
        median_collateral: median,
        standard_deviation: isqrt(variance),
        unique_holders,
        buckets,
    })
}

/// Count, collateral and share of one group.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats<K> {
    pub key: K,
    pub count: usize,
    #[serde(with = "decimal")]
    pub collateral: u128,
    pub percentage: f64,
}

fn group<K: Copy + PartialEq>(keys: &[K], population: usize, items: &[(K, u128)]) -> Vec<GroupStats<K>> {
    keys.iter()
        .map(|&key| {
            let (count, collateral) = items
                .iter()
                .filter(|(k, _)| *k == key)
                .fold((0usize, 0u128), |(n, c), (_, amount)| (n + 1, c.saturating_add(*amount)));
            GroupStats {
                key,
                count,
                collateral,
                percentage: share(count, population),
            }
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierDistribution {
    pub tiers: Vec<GroupStats<Tier>>,
    /// Vaults with no tier, either below the lowest threshold or because the
    /// sample was too small.
    pub untiered: usize,
}

pub fn tier_distribution(ranked: &[RankedVault]) -> TierDistribution {
    let items: Vec<(Option<Tier>, u128)> = ranked
        .iter()
        .map(|r| (r.tier, r.vault.collateral_amount))
        .collect();
    let keys: Vec<Option<Tier>> = Tier::ALL.iter().copied().map(Some).collect();
    let tiers = group(&keys, ranked.len(), &items)
        .into_iter()
        .filter_map(|g| {
            g.key.map(|key| GroupStats {
                key,
                count: g.count,
                collateral: g.collateral,
                percentage: g.percentage,
            })
        })
        .collect();
    TierDistribution {
        tiers,
        untiered: ranked.iter().filter(|r| r.tier.is_none()).count(),
    }
}

/// Vesting vaults by whole days until vesting ends.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DaysBuckets {
    /// 0 to 30 days.
    pub imminent: usize,
    /// 31 to 90 days.
    pub soon: usize,
    /// 91 to 365 days.
    pub medium: usize,
    /// More than 365 days.
    pub long: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VestingDistribution {
    pub vested_count: usize,
    pub vesting_count: usize,
    #[serde(with = "decimal")]
    pub vested_collateral: u128,
    #[serde(with = "decimal")]
    pub vesting_collateral: u128,
    pub vested_percentage: f64,
    pub vesting_percentage: f64,
    /// Mean over vesting vaults, fractional days.
    pub average_days_remaining: f64,
    pub days_buckets: DaysBuckets,
}

pub fn vesting_distribution(vaults: &[Vault], now: u64) -> VestingDistribution {
    let mut d = VestingDistribution::default();
    let mut seconds_remaining: u128 = 0;
    for v in vaults {
        if is_vested(v, now) {
            d.vested_count += 1;
            d.vested_collateral = d.vested_collateral.saturating_add(v.collateral_amount);
            continue;
        }
        d.vesting_count += 1;
        d.vesting_collateral = d.vesting_collateral.saturating_add(v.collateral_amount);
        let remaining = v.mint_timestamp.saturating_add(VESTING_PERIOD) - now;
        seconds_remaining += u128::from(remaining);
        let bucket = match remaining {
            r if r <= 30 * SECONDS_PER_DAY => &mut d.days_buckets.imminent,
            r if r <= 90 * SECONDS_PER_DAY => &mut d.days_buckets.soon,
            r if r <= 365 * SECONDS_PER_DAY => &mut d.days_buckets.medium,
            _ => &mut d.days_buckets.long,
        };
        *bucket += 1;
    }
    if d.vesting_count > 0 {
        d.average_days_remaining =
            seconds_remaining as f64 / SECONDS_PER_DAY as f64 / d.vesting_count as f64;
    }
    d.vested_percentage = share(d.vested_count, vaults.len());
    d.vesting_percentage = share(d.vesting_count, vaults.len());
    d
}

pub fn dormancy_distribution(vaults: &[Vault], now: u64) -> Vec<GroupStats<DormancyState>> {
    let items: Vec<(DormancyState, u128)> = vaults
        .iter()
        .map(|v| (dormancy_state(v, now), v.collateral_amount))
        .collect();
    group(&DormancyState::ALL, vaults.len(), &items)
}

/// Everything the distribution report shows for one population.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionReport {
    pub population: usize,
    pub portfolio: PortfolioStats,
    pub tiers: TierDistribution,
    pub vesting: VestingDistribution,
    pub dormancy: Vec<GroupStats<DormancyState>>,
}

pub fn calculate_distribution(
    vaults: Vec<Vault>,
    options: &RankingOptions,
    now: u64,
) -> Result<DistributionReport, Error> {
    let portfolio = portfolio_stats(&vaults)?;
    let vesting = vesting_distribution(&vaults, now);
    let dormancy = dormancy_distribution(&vaults, now);
    let population = vaults.len();
    let tiers = tier_distribution(&rank_vaults(vaults, options));
    Ok(DistributionReport {
        population,
        portfolio,
        tiers,
        vesting,
        dormancy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::status::tests::{vault, DAY, NOW};

    #[test]
    fn portfolio_stats_use_integer_math() {
        let vaults = vec![vault(1, 10), vault(2, 20), vault(3, 30), vault(4, 41)];
        let s = portfolio_stats(&vaults).unwrap();
        assert_eq!(s.total_collateral, 101);
        assert_eq!(s.average_collateral, 25);
        assert_eq!(s.median_collateral, 25);
        // deviations 15, 5, 5, 16 -> variance 531 / 4 = 132
        assert_eq!(s.standard_deviation, 11);
        assert_eq!(s.unique_holders, 4);
    }

    #[test]
    fn median_of_odd_population_is_middle_value() {
        let s = portfolio_stats(&[vault(1, 7), vault(2, 1), vault(3, 100)]).unwrap();
        assert_eq!(s.median_collateral, 7);
    }

    #[test]
    fn empty_population_has_no_buckets() {
        assert_eq!(portfolio_stats(&[]).unwrap(), PortfolioStats::default());
    }

    #[test]
    fn buckets_split_on_whole_btc_bounds() {
        let vaults = vec![
            vault(1, ONE_BTC / 10 - 1),
            vault(2, ONE_BTC / 10),
            vault(3, ONE_BTC),
            vault(4, 10 * ONE_BTC),
        ];
        let s = portfolio_stats(&vaults).unwrap();
        let counts: Vec<usize> = s.buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 1, 0, 1, 0, 1]);
        assert_eq!(s.buckets[5].label, ">=10");
    }

    #[test]
    fn collateral_overflow_is_an_error() {
        let err = portfolio_stats(&[vault(1, u128::MAX), vault(2, 1)]).unwrap_err();
        assert!(matches!(err, Error::Overflow { what: "total collateral" }));

        let err = portfolio_stats(&[vault(1, u128::MAX - 1), vault(2, 1), vault(3, 0)]).unwrap_err();
        assert!(matches!(err, Error::Overflow { .. }));
    }

    #[test]
    fn isqrt_floors() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
        assert_eq!(isqrt(u128::MAX), u128::from(u64::MAX));
    }

    #[test]
    fn vesting_distribution_buckets_days() {
        let mut vested = vault(1, 50);
        vested.mint_timestamp = NOW - VESTING_PERIOD;
        let mut soon = vault(2, 10);
        soon.mint_timestamp = NOW - VESTING_PERIOD + 30 * DAY;
        let mut mid = vault(3, 10);
        mid.mint_timestamp = NOW - VESTING_PERIOD + 31 * DAY;
        let long = vault(4, 10);
        let d = vesting_distribution(&[vested, soon, mid, long], NOW);
        assert_eq!(d.vested_count, 1);
        assert_eq!(d.vested_collateral, 50);
        assert_eq!(d.vesting_count, 3);
        assert_eq!(d.days_buckets, DaysBuckets { imminent: 1, soon: 1, medium: 0, long: 1 });
        assert!((d.vested_percentage - 25.0).abs() < 1e-9);
    }

    #[test]
    fn dormancy_shares_are_against_population() {
        let mut stale = vault(2, 30);
        stale.last_activity = NOW - 1200 * DAY;
        let groups = dormancy_distribution(&[vault(1, 10), stale], NOW);
        assert_eq!(groups[0].key, DormancyState::Active);
        assert_eq!(groups[0].count, 1);
        assert_eq!(groups[1].collateral, 30);
        assert!((groups[1].percentage - 50.0).abs() < 1e-9);
        assert_eq!(groups[2].count, 0);
    }

    #[test]
    fn small_population_is_all_untiered() {
        let report = calculate_distribution(
            (1..=3).map(|i| vault(i, i * 10)).collect(),
            &RankingOptions::default(),
            NOW,
        )
        .unwrap();
        assert_eq!(report.population, 3);
        assert_eq!(report.tiers.untiered, 3);
        assert!(report.tiers.tiers.iter().all(|g| g.count == 0));
    }
}
