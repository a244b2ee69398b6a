//! Achievement claims: per-type distribution, the lifecycle funnel, and
//! wallet profiles.

use crate::config::protocol::SECONDS_PER_DAY;
use crate::events::{Address, EventKind, IndexedEvent, SchemaError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// In order of progression; later variants are rarer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AchievementType {
    Minter,
    FirstMonth,
    QuarterStack,
    HalfYear,
    Annual,
    DiamondHands,
    Matured,
    HodlerSupreme,
}

impl AchievementType {
    pub const ALL: [AchievementType; 8] = [
        Self::Minter,
        Self::FirstMonth,
        Self::QuarterStack,
        Self::HalfYear,
        Self::Annual,
        Self::DiamondHands,
        Self::Matured,
        Self::HodlerSupreme,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minter => "MINTER",
            Self::FirstMonth => "FIRST_MONTH",
            Self::QuarterStack => "QUARTER_STACK",
            Self::HalfYear => "HALF_YEAR",
            Self::Annual => "ANNUAL",
            Self::DiamondHands => "DIAMOND_HANDS",
            Self::Matured => "MATURED",
            Self::HodlerSupreme => "HODLER_SUPREME",
        }
    }

    /// keccak256 of the type name, as the contract stores it.
    pub fn type_hash(&self) -> &'static str {
        match self {
            Self::Minter => "0xf0887ba65ee2024ea881d91b74c2450ef19e1557f03bed3ea9f16b037cbe2dc9",
            Self::FirstMonth => "0x92b9bd24b1513009df4a5acf31d7b7282271a13b886d746367979adffa401b23",
            Self::QuarterStack => "0x5d0ce431820b31c330750440d2ee38924fa95e8718fa1af9c80ae4caeacfefa7",
            Self::HalfYear => "0x057b50ab6fb6da7d038cab2b84b7ee55accbd680e9c6c9faaf85fd0ec3469bed",
            Self::Annual => "0x8e5c41880d36050b537c699aa5a031fb23422e63ce6a14ac878aa8a5a670337e",
            Self::DiamondHands => "0x98a6d6dee6fa0ea5a6b97abf79dde0f26a4cc92eba88a7737416eeeb74fa20c6",
            Self::Matured => "0xc08241f99d245a1865125a383bc2c9dfcef3b29558eb8b02ee883b61565a83bb",
            Self::HodlerSupreme => "0xdda6e013575f7e7db6a37f8350a8f891c70d53854877c9dcbf6d73271b3db46b",
        }
    }

    pub fn from_hash(hash: &str) -> Result<Self, SchemaError> {
        Self::ALL
            .into_iter()
            .find(|t| t.type_hash().eq_ignore_ascii_case(hash.trim()))
            .ok_or_else(|| SchemaError::UnknownAchievement(hash.to_string()))
    }

    /// Holding time a duration achievement requires.
    pub fn duration_threshold(&self) -> Option<u64> {
        let days = match self {
            Self::FirstMonth => 30,
            Self::QuarterStack => 91,
            Self::HalfYear => 182,
            Self::Annual => 365,
            Self::DiamondHands => 730,
            _ => return None,
        };
        Some(days * SECONDS_PER_DAY)
    }
}

impl fmt::Display for AchievementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(wallet, type)` of an achievement event, `None` for other kinds.
fn claim(kind: &EventKind) -> Option<Result<(&Address, AchievementType), SchemaError>> {
    let claimed = match kind {
        EventKind::MinterAchievementClaimed { wallet, .. } => (wallet, AchievementType::Minter),
        EventKind::MaturedAchievementClaimed { wallet, .. } => (wallet, AchievementType::Matured),
        EventKind::HodlerSupremeVaultMinted { wallet, .. } => {
            (wallet, AchievementType::HodlerSupreme)
        }
        EventKind::DurationAchievementClaimed {
            wallet,
            achievement_type,
            ..
        } => return Some(AchievementType::from_hash(achievement_type).map(|t| (wallet, t))),
        _ => return None,
    };
    Some(Ok(claimed))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementStats {
    #[serde(rename = "type")]
    pub achievement: AchievementType,
    pub unique_holders: usize,
    pub total_claims: usize,
    /// 0 when never claimed.
    pub first_claim: u64,
    pub latest_claim: u64,
}

/// One entry per achievement type, in progression order.
pub fn achievement_distribution(events: &[IndexedEvent]) -> Result<Vec<AchievementStats>, SchemaError> {
    let mut by_type: BTreeMap<AchievementType, (HashSet<String>, AchievementStats)> = BTreeMap::new();
    for ev in events {
        let Some(claimed) = claim(&ev.kind) else {
            continue;
        };
        let (wallet, t) = claimed?;
        let ts = ev.meta.block_timestamp;
        let (wallets, stats) = by_type.entry(t).or_insert_with(|| {
            (
                HashSet::new(),
                AchievementStats {
                    achievement: t,
                    unique_holders: 0,
                    total_claims: 0,
                    first_claim: ts,
                    latest_claim: ts,
                },
            )
        });
        wallets.insert(wallet.to_ascii_lowercase());
        stats.total_claims += 1;
        stats.first_claim = stats.first_claim.min(ts);
        stats.latest_claim = stats.latest_claim.max(ts);
    }
    Ok(AchievementType::ALL
        .into_iter()
        .map(|t| match by_type.remove(&t) {
            Some((wallets, stats)) => AchievementStats {
                unique_holders: wallets.len(),
                ..stats
            },
            None => AchievementStats {
                achievement: t,
                unique_holders: 0,
                total_claims: 0,
                first_claim: 0,
                latest_claim: 0,
            },
        })
        .collect())
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementFunnel {
    pub minter_count: usize,
    pub matured_count: usize,
    pub hodler_supreme_count: usize,
    pub minter_to_matured_rate: f64,
    pub matured_to_hodler_rate: f64,
    /// Hodler supreme over minter.
    pub completion_rate: f64,
}

fn rate(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Achievement types held per lowercased wallet.
fn holdings(events: &[IndexedEvent]) -> Result<BTreeMap<String, BTreeSet<AchievementType>>, SchemaError> {
    let mut held: BTreeMap<String, BTreeSet<AchievementType>> = BTreeMap::new();
    for ev in events {
        if let Some(claimed) = claim(&ev.kind) {
            let (wallet, t) = claimed?;
            held.entry(wallet.to_ascii_lowercase()).or_default().insert(t);
        }
    }
    Ok(held)
}

pub fn achievement_funnel(events: &[IndexedEvent]) -> Result<AchievementFunnel, SchemaError> {
    let held = holdings(events)?;
    let count = |t: AchievementType| held.values().filter(|s| s.contains(&t)).count();
    let minter = count(AchievementType::Minter);
    let matured = count(AchievementType::Matured);
    let hodler = count(AchievementType::HodlerSupreme);
    Ok(AchievementFunnel {
        minter_count: minter,
        matured_count: matured,
        hodler_supreme_count: hodler,
        minter_to_matured_rate: rate(matured, minter),
        matured_to_hodler_rate: rate(hodler, matured),
        completion_rate: rate(hodler, minter),
    })
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletProfile {
    pub wallet: Address,
    pub achievements: Vec<AchievementType>,
    pub rarest: Option<AchievementType>,
    /// Share of all achievement types held.
    pub completion: f64,
}

/// Profiles ordered by number of achievements, then wallet.
pub fn wallet_profiles(events: &[IndexedEvent]) -> Result<Vec<WalletProfile>, SchemaError> {
    let mut profiles: Vec<WalletProfile> = holdings(events)?
        .into_iter()
        .map(|(wallet, set)| WalletProfile {
            rarest: set.last().copied(),
            completion: rate(set.len(), AchievementType::ALL.len()),
            achievements: set.into_iter().collect(),
            wallet,
        })
        .collect();
    profiles.sort_by(|a, b| b.achievements.len().cmp(&a.achievements.len()).then(a.wallet.cmp(&b.wallet)));
    Ok(profiles)
}

/// Distribution and funnel together, as one report.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementReport {
    pub distribution: Vec<AchievementStats>,
    pub funnel: AchievementFunnel,
}

pub fn achievement_report(events: &[IndexedEvent]) -> Result<AchievementReport, SchemaError> {
    Ok(AchievementReport {
        distribution: achievement_distribution(events)?,
        funnel: achievement_funnel(events)?,
    })
}
