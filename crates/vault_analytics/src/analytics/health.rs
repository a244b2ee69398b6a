//! Ecosystem-wide health indicators.

use super::risk::{analyze_dormancy_risks, RiskLevel};
use super::status::is_vested;
use crate::events::amount::decimal;
use crate::events::{EventKind, IndexedEvent, Vault};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EcosystemHealth {
    /// Funded minus claimed.
    #[serde(with = "decimal")]
    pub match_pool_balance: u128,
    /// Forfeitures plus direct funding.
    #[serde(with = "decimal")]
    pub match_pool_funded: u128,
    #[serde(with = "decimal")]
    pub match_pool_claimed: u128,
    /// Claimed / funded, percent.
    pub match_pool_utilization: f64,
    /// Early redemptions / mints, percent.
    pub early_redemption_rate: f64,
    /// Separations / vested vaults, percent.
    pub separation_rate: f64,
    /// Collateral-weighted risk, 0..=100.
    pub dormancy_risk_score: f64,
    /// Wallets with any achievement / unique vault holders, percent.
    pub achievement_adoption_rate: f64,
    pub total_vaults: usize,
    #[serde(with = "decimal")]
    pub total_collateral: u128,
    pub unique_holders: usize,
    pub mint_count: u64,
    pub redemption_count: u64,
    pub separation_count: u64,
}

fn rate(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

/// `events` supply the flow counts; `vaults` the current population.
pub fn calculate_ecosystem_health(events: &[IndexedEvent], vaults: &[Vault], now: u64) -> EcosystemHealth {
    let mut h = EcosystemHealth::default();
    let mut achievement_wallets: HashSet<String> = HashSet::new();

    for ev in events {
        match &ev.kind {
            EventKind::VaultMinted { .. } => h.mint_count += 1,
            EventKind::EarlyRedemption { forfeited, .. } => {
                h.redemption_count += 1;
                h.match_pool_funded = h.match_pool_funded.saturating_add(*forfeited);
            }
            EventKind::MatchPoolFunded { amount, .. } => {
                h.match_pool_funded = h.match_pool_funded.saturating_add(*amount);
            }
            EventKind::MatchClaimed { amount, .. } => {
                h.match_pool_claimed = h.match_pool_claimed.saturating_add(*amount);
            }
            EventKind::BtcTokenMinted { .. } => h.separation_count += 1,
            EventKind::MinterAchievementClaimed { wallet, .. }
            | EventKind::MaturedAchievementClaimed { wallet, .. }
            | EventKind::DurationAchievementClaimed { wallet, .. }
            | EventKind::HodlerSupremeVaultMinted { wallet, .. } => {
                achievement_wallets.insert(wallet.to_ascii_lowercase());
            }
            _ => {}
        }
    }

    h.total_vaults = vaults.len();
    h.total_collateral = vaults
        .iter()
        .fold(0u128, |acc, v| acc.saturating_add(v.collateral_amount));
    h.unique_holders = vaults
        .iter()
        .map(|v| v.owner.to_ascii_lowercase())
        .collect::<HashSet<_>>()
        .len();
    let vested = vaults.iter().filter(|v| is_vested(v, now)).count();

    h.match_pool_balance = h.match_pool_funded.saturating_sub(h.match_pool_claimed);
    h.match_pool_utilization = rate(h.match_pool_claimed as f64, h.match_pool_funded as f64);
    h.early_redemption_rate = rate(h.redemption_count as f64, h.mint_count as f64);
    h.separation_rate = rate(h.separation_count as f64, vested as f64);
    h.achievement_adoption_rate = rate(achievement_wallets.len() as f64, h.unique_holders as f64);

    let risks = analyze_dormancy_risks(vaults, now, RiskLevel::Low);
    let (weighted, weight) = risks.iter().fold((0u128, 0u128), |(ws, w), r| {
        (
            ws.saturating_add(r.collateral_at_risk.saturating_mul(u128::from(r.level.weight()))),
            w.saturating_add(r.collateral_at_risk),
        )
    });
    h.dormancy_risk_score = if weight > 0 {
        weighted as f64 / weight as f64
    } else {
        0.0
    };
    h
}
