//! Dormancy risk scoring by days of inactivity.

use crate::config::protocol::{DORMANCY_THRESHOLD, SECONDS_PER_DAY};
use crate::events::amount::decimal;
use crate::events::Vault;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    /// Weight in the collateral-weighted ecosystem risk score.
    pub fn weight(&self) -> u32 {
        match self {
            RiskLevel::Low => 0,
            RiskLevel::Medium => 25,
            RiskLevel::High => 50,
            RiskLevel::Critical => 100,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown risk level: {s}"))
    }
}

/// Days of inactivity at which each level starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RiskThresholds {
    pub medium: u64,
    pub high: u64,
    pub critical: u64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium: 730,
            high: 1000,
            critical: 1099,
        }
    }
}

impl RiskThresholds {
    pub fn level(&self, days_inactive: u64) -> RiskLevel {
        if days_inactive >= self.critical {
            RiskLevel::Critical
        } else if days_inactive >= self.high {
            RiskLevel::High
        } else if days_inactive >= self.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DormancyRisk {
    #[serde(with = "decimal")]
    pub token_id: u128,
    pub days_inactive: u64,
    /// Negative once the threshold has passed.
    pub days_until_dormant: i64,
    pub level: RiskLevel,
    pub last_activity: u64,
    #[serde(with = "decimal")]
    pub collateral_at_risk: u128,
}

/// Inactivity counts from the last activity, or from mint if none was recorded.
pub fn dormancy_risk(vault: &Vault, now: u64, thresholds: &RiskThresholds) -> DormancyRisk {
    let last_activity = if vault.last_activity > 0 {
        vault.last_activity
    } else {
        vault.mint_timestamp
    };
    let days_inactive = now.saturating_sub(last_activity) / SECONDS_PER_DAY;
    let threshold_days = DORMANCY_THRESHOLD / SECONDS_PER_DAY;
    let days_until_dormant = i64::try_from(threshold_days).unwrap_or(i64::MAX)
        - i64::try_from(days_inactive).unwrap_or(i64::MAX);
    DormancyRisk {
        token_id: vault.token_id,
        days_inactive,
        days_until_dormant,
        level: thresholds.level(days_inactive),
        last_activity,
        collateral_at_risk: vault.collateral_amount,
    }
}

/// Risks at or above `min_level`, most inactive first, ties by token id.
pub fn analyze_dormancy_risks(vaults: &[Vault], now: u64, min_level: RiskLevel) -> Vec<DormancyRisk> {
    let thresholds = RiskThresholds::default();
    let mut risks: Vec<DormancyRisk> = vaults
        .iter()
        .map(|v| dormancy_risk(v, now, &thresholds))
        .filter(|r| r.level >= min_level)
        .collect();
    risks.sort_by(|a, b| {
        b.days_inactive
            .cmp(&a.days_inactive)
            .then(a.token_id.cmp(&b.token_id))
    });
    risks
}

/// Collateral per risk level. Every level is present.
pub fn collateral_at_risk(risks: &[DormancyRisk]) -> BTreeMap<RiskLevel, u128> {
    let mut out: BTreeMap<RiskLevel, u128> = RiskLevel::ALL.into_iter().map(|l| (l, 0)).collect();
    for r in risks {
        let slot = out.entry(r.level).or_default();
        *slot = slot.saturating_add(r.collateral_at_risk);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::status::tests::{vault, DAY, NOW};

    fn idle(token_id: u128, days: u64) -> Vault {
        let mut v = vault(token_id, 10 * token_id);
        v.last_activity = NOW - days * DAY;
        v
    }

    #[test]
    fn levels_follow_day_thresholds() {
        let t = RiskThresholds::default();
        assert_eq!(t.level(729), RiskLevel::Low);
        assert_eq!(t.level(730), RiskLevel::Medium);
        assert_eq!(t.level(1000), RiskLevel::High);
        assert_eq!(t.level(1099), RiskLevel::Critical);
    }

    #[test]
    fn falls_back_to_mint_when_no_activity() {
        let mut v = vault(1, 5);
        v.last_activity = 0;
        v.mint_timestamp = NOW - 800 * DAY;
        let r = dormancy_risk(&v, NOW, &RiskThresholds::default());
        assert_eq!(r.days_inactive, 800);
        assert_eq!(r.days_until_dormant, 329);
        assert_eq!(r.level, RiskLevel::Medium);
    }

    #[test]
    fn analysis_sorts_and_filters() {
        let vaults = vec![idle(1, 100), idle(2, 1100), idle(3, 800), idle(4, 1100)];
        let risks = analyze_dormancy_risks(&vaults, NOW, RiskLevel::Medium);
        let ids: Vec<u128> = risks.iter().map(|r| r.token_id).collect();
        assert_eq!(ids, vec![2, 4, 3]);
        assert_eq!(risks[0].days_until_dormant, 29);

        let totals = collateral_at_risk(&analyze_dormancy_risks(&vaults, NOW, RiskLevel::Low));
        assert_eq!(totals[&RiskLevel::Low], 10);
        assert_eq!(totals[&RiskLevel::Critical], 60);
        assert_eq!(totals[&RiskLevel::High], 0);
    }

    #[test]
    fn level_parses_case_insensitively() {
        assert_eq!("high".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert!("severe".parse::<RiskLevel>().is_err());
    }
}
