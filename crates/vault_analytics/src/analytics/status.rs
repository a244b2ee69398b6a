//! Pure status derivation over a vault and an explicit `now`.

use crate::config::protocol::{
    DORMANCY_THRESHOLD, GRACE_PERIOD, SECONDS_PER_DAY, VESTING_PERIOD, WITHDRAWAL_PERIOD,
    WITHDRAWAL_RATE_DENOMINATOR, WITHDRAWAL_RATE_NUMERATOR,
};
use crate::events::amount::decimal;
use crate::events::{DormancyState, Vault};
use serde::Serialize;

pub fn vesting_ends_at(vault: &Vault) -> u64 {
    vault.mint_timestamp.saturating_add(VESTING_PERIOD)
}

pub fn is_vested(vault: &Vault, now: u64) -> bool {
    now >= vesting_ends_at(vault)
}

pub fn is_separated(vault: &Vault) -> bool {
    vault.vested_amount > 0
}

/// Whole days until vesting completes; 0 once vested.
pub fn vesting_days_remaining(vault: &Vault, now: u64) -> u64 {
    vesting_ends_at(vault).saturating_sub(now) / SECONDS_PER_DAY
}

/// A poke counts only if it is not older than the latest activity.
fn outstanding_poke(vault: &Vault) -> Option<u64> {
    (vault.poke_timestamp > 0 && vault.poke_timestamp >= vault.last_activity)
        .then_some(vault.poke_timestamp)
}

/// Dormancy state at `now`.
///
/// Poked vaults are `PokePending` for `GRACE_PERIOD` after the poke, then
/// `Claimable`. Unpoked vaults are `PokePending` once `DORMANCY_THRESHOLD`
/// has passed since the last activity.
pub fn dormancy_state(vault: &Vault, now: u64) -> DormancyState {
    if let Some(poke) = outstanding_poke(vault) {
        return if now.saturating_sub(poke) >= GRACE_PERIOD {
            DormancyState::Claimable
        } else {
            DormancyState::PokePending
        };
    }
    if now.saturating_sub(vault.last_activity) >= DORMANCY_THRESHOLD {
        DormancyState::PokePending
    } else {
        DormancyState::Active
    }
}

/// Amount the owner could withdraw at `now`: one period's share of the
/// collateral, once vested and a full period after the last withdrawal.
pub fn withdrawable_amount(vault: &Vault, now: u64) -> u128 {
    if !is_vested(vault, now) {
        return 0;
    }
    if now < vault.last_withdrawal.saturating_add(WITHDRAWAL_PERIOD) {
        return 0;
    }
    vault.collateral_amount.saturating_mul(WITHDRAWAL_RATE_NUMERATOR) / WITHDRAWAL_RATE_DENOMINATOR
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultStatus {
    pub is_vested: bool,
    pub is_separated: bool,
    pub dormancy_state: DormancyState,
    pub vesting_days_remaining: u64,
    pub vesting_ends_at: u64,
    #[serde(with = "decimal")]
    pub withdrawable: u128,
}

pub fn derive_status(vault: &Vault, now: u64) -> VaultStatus {
    VaultStatus {
        is_vested: is_vested(vault, now),
        is_separated: is_separated(vault),
        dormancy_state: dormancy_state(vault, now),
        vesting_days_remaining: vesting_days_remaining(vault, now),
        vesting_ends_at: vesting_ends_at(vault),
        withdrawable: withdrawable_amount(vault, now),
    }
}
