//! Ghost variables: protocol-wide running totals folded from the event log.

use crate::events::amount::decimal;
use crate::events::{Address, EventKind, IndexedEvent, OrderingKey};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Collateral flows for one collateral token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DenominationTotals {
    #[serde(with = "decimal")]
    pub minted: u128,
    /// Match pool rewards credited into vaults.
    #[serde(with = "decimal")]
    pub matched: u128,
    /// Direct and delegated withdrawals.
    #[serde(with = "decimal")]
    pub withdrawn: u128,
    /// Early redemptions, returned plus forfeited.
    #[serde(with = "decimal")]
    pub redeemed: u128,
    /// The forfeited part of `redeemed`.
    #[serde(with = "decimal")]
    pub forfeited: u128,
    #[serde(with = "decimal")]
    pub dormancy_claimed: u128,
    /// Still held by open vaults.
    #[serde(with = "decimal")]
    pub vaulted: u128,
    /// Exits that exceeded the vault's balance at the time.
    #[serde(with = "decimal")]
    pub overdrawn: u128,
    /// Left in vaults when they closed. Not part of `accounted`.
    #[serde(with = "decimal")]
    pub stranded: u128,
}

impl DenominationTotals {
    pub fn locked(&self) -> u128 {
        self.minted.saturating_add(self.matched)
    }

    pub fn accounted(&self) -> u128 {
        self.vaulted
            .saturating_add(self.withdrawn)
            .saturating_add(self.redeemed)
            .saturating_add(self.dormancy_claimed)
    }
}

/// The separated fungible token, seen from both sides.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VestedTokenTotals {
    #[serde(with = "decimal")]
    pub separated: u128,
    #[serde(with = "decimal")]
    pub recombined: u128,
    /// Burned by dormancy claimers to release collateral.
    #[serde(with = "decimal")]
    pub burned_on_claim: u128,
    /// Sum of per-vault separated amounts.
    #[serde(with = "decimal")]
    pub vault_side: u128,
}

impl VestedTokenTotals {
    pub fn supply(&self) -> u128 {
        self.separated
            .saturating_sub(self.recombined)
            .saturating_sub(self.burned_on_claim)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPoolTotals {
    /// Forfeitures plus direct funding.
    #[serde(with = "decimal")]
    pub funded: u128,
    #[serde(with = "decimal")]
    pub claimed: u128,
}

impl MatchPoolTotals {
    pub fn balance(&self) -> u128 {
        self.funded.saturating_sub(self.claimed)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallCounters {
    pub mint: u64,
    pub withdraw: u64,
    pub delegated_withdraw: u64,
    pub early_redeem: u64,
    pub separate: u64,
    pub recombine: u64,
    pub claim_match: u64,
    pub fund_match_pool: u64,
    pub poke: u64,
    pub prove_activity: u64,
    pub dormancy_claim: u64,
    pub achievement_claims: u64,
    pub auction_purchases: u64,
    pub settled_slots: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GhostVariables {
    pub denominations: BTreeMap<Address, DenominationTotals>,
    pub vested_token: VestedTokenTotals,
    pub match_pool: MatchPoolTotals,
    pub counters: CallCounters,
    pub events_folded: u64,
    pub last_key: Option<OrderingKey>,
}

#[derive(Clone, Debug)]
struct VaultBalance {
    denomination: Address,
    collateral: u128,
    vested: u128,
}

/// Accumulator for the fold. Per-vault balances let exits be checked against
/// what the vault actually held.
struct GhostFold {
    ghosts: GhostVariables,
    vaults: HashMap<u128, VaultBalance>,
    default_denomination: Address,
}

impl GhostFold {
    fn new(default_denomination: &str) -> Self {
        Self {
            ghosts: GhostVariables::default(),
            vaults: HashMap::new(),
            default_denomination: default_denomination.to_string(),
        }
    }

    fn denomination_of(&self, token_id: u128) -> Address {
        self.vaults
            .get(&token_id)
            .map_or_else(|| self.default_denomination.clone(), |v| v.denomination.clone())
    }

    fn totals(&mut self, denomination: Address) -> &mut DenominationTotals {
        self.ghosts.denominations.entry(denomination).or_default()
    }

    /// Take `amount` out of a vault. Returns the denomination and the part
    /// the vault could not cover.
    fn debit(&mut self, token_id: u128, amount: u128) -> (Address, u128) {
        let denomination = self.denomination_of(token_id);
        let covered = match self.vaults.get_mut(&token_id) {
            Some(v) => {
                let take = v.collateral.min(amount);
                v.collateral -= take;
                take
            }
            None => 0,
        };
        let totals = self.totals(denomination.clone());
        totals.vaulted = totals.vaulted.saturating_sub(covered);
        let short = amount - covered;
        totals.overdrawn = totals.overdrawn.saturating_add(short);
        (denomination, short)
    }

    /// Remove a closed vault. Its separated amount leaves the vault side and
    /// any collateral the exit did not take out is booked as stranded.
    fn close(&mut self, token_id: u128) -> u128 {
        let Some(vault) = self.vaults.remove(&token_id) else {
            return 0;
        };
        if vault.collateral > 0 {
            let totals = self.totals(vault.denomination);
            totals.vaulted = totals.vaulted.saturating_sub(vault.collateral);
            totals.stranded = totals.stranded.saturating_add(vault.collateral);
        }
        let token = &mut self.ghosts.vested_token;
        token.vault_side = token.vault_side.saturating_sub(vault.vested);
        vault.vested
    }

    fn step(mut self, ev: &IndexedEvent) -> Self {
        match &ev.kind {
            EventKind::VaultMinted {
                token_id,
                collateral,
                collateral_token,
                ..
            } => {
                let denomination = collateral_token
                    .clone()
                    .unwrap_or_else(|| self.default_denomination.clone());
                let totals = self.totals(denomination.clone());
                totals.minted = totals.minted.saturating_add(*collateral);
                totals.vaulted = totals.vaulted.saturating_add(*collateral);
                self.vaults.insert(
                    *token_id,
                    VaultBalance {
                        denomination,
                        collateral: *collateral,
                        vested: 0,
                    },
                );
                self.ghosts.counters.mint += 1;
            }
            EventKind::Withdrawn {
                token_id, amount, ..
            }
            | EventKind::DelegatedWithdrawal {
                token_id, amount, ..
            } => {
                let (denomination, _) = self.debit(*token_id, *amount);
                let totals = self.totals(denomination);
                totals.withdrawn = totals.withdrawn.saturating_add(*amount);
                if matches!(ev.kind, EventKind::Withdrawn { .. }) {
                    self.ghosts.counters.withdraw += 1;
                } else {
                    self.ghosts.counters.delegated_withdraw += 1;
                }
            }
            EventKind::EarlyRedemption {
                token_id,
                returned,
                forfeited,
                ..
            } => {
                let exit = returned.saturating_add(*forfeited);
                let (denomination, _) = self.debit(*token_id, exit);
                let totals = self.totals(denomination);
                totals.redeemed = totals.redeemed.saturating_add(exit);
                totals.forfeited = totals.forfeited.saturating_add(*forfeited);
                self.close(*token_id);
                let pool = &mut self.ghosts.match_pool;
                pool.funded = pool.funded.saturating_add(*forfeited);
                self.ghosts.counters.early_redeem += 1;
            }
            EventKind::DormantCollateralClaimed {
                token_id,
                collateral_claimed,
                ..
            } => {
                let (denomination, _) = self.debit(*token_id, *collateral_claimed);
                let totals = self.totals(denomination);
                totals.dormancy_claimed = totals.dormancy_claimed.saturating_add(*collateral_claimed);
                let burned = self.close(*token_id);
                let token = &mut self.ghosts.vested_token;
                token.burned_on_claim = token.burned_on_claim.saturating_add(burned);
                self.ghosts.counters.dormancy_claim += 1;
            }
            EventKind::MatchClaimed { token_id, amount } => {
                let denomination = self.denomination_of(*token_id);
                let credited = match self.vaults.get_mut(token_id) {
                    Some(v) => {
                        v.collateral = v.collateral.saturating_add(*amount);
                        *amount
                    }
                    None => 0,
                };
                let totals = self.totals(denomination);
                totals.matched = totals.matched.saturating_add(*amount);
                totals.vaulted = totals.vaulted.saturating_add(credited);
                let pool = &mut self.ghosts.match_pool;
                pool.claimed = pool.claimed.saturating_add(*amount);
                self.ghosts.counters.claim_match += 1;
            }
            EventKind::MatchPoolFunded { amount, .. } => {
                let pool = &mut self.ghosts.match_pool;
                pool.funded = pool.funded.saturating_add(*amount);
                self.ghosts.counters.fund_match_pool += 1;
            }
            EventKind::BtcTokenMinted {
                token_id, amount, ..
            } => {
                let token = &mut self.ghosts.vested_token;
                token.separated = token.separated.saturating_add(*amount);
                if let Some(v) = self.vaults.get_mut(token_id) {
                    v.vested = v.vested.saturating_add(*amount);
                    token.vault_side = token.vault_side.saturating_add(*amount);
                }
                self.ghosts.counters.separate += 1;
            }
            EventKind::BtcTokenReturned {
                token_id, amount, ..
            } => {
                let token = &mut self.ghosts.vested_token;
                token.recombined = token.recombined.saturating_add(*amount);
                if let Some(v) = self.vaults.get_mut(token_id) {
                    let take = v.vested.min(*amount);
                    v.vested -= take;
                    token.vault_side = token.vault_side.saturating_sub(take);
                }
                self.ghosts.counters.recombine += 1;
            }
            EventKind::DormantPoked { .. } => self.ghosts.counters.poke += 1,
            EventKind::ActivityProven { .. } => self.ghosts.counters.prove_activity += 1,
            EventKind::MinterAchievementClaimed { .. }
            | EventKind::MaturedAchievementClaimed { .. }
            | EventKind::DurationAchievementClaimed { .. }
            | EventKind::HodlerSupremeVaultMinted { .. } => {
                self.ghosts.counters.achievement_claims += 1;
            }
            EventKind::DutchPurchase { .. } => self.ghosts.counters.auction_purchases += 1,
            EventKind::SlotSettled { .. } => self.ghosts.counters.settled_slots += 1,
            EventKind::DormancyStateChanged { .. }
            | EventKind::WithdrawalDelegateGranted { .. }
            | EventKind::WithdrawalDelegateRevoked { .. }
            | EventKind::AllWithdrawalDelegatesRevoked { .. }
            | EventKind::DutchAuctionCreated { .. }
            | EventKind::EnglishAuctionCreated { .. }
            | EventKind::BidPlaced { .. }
            | EventKind::BidRefunded { .. }
            | EventKind::AuctionFinalized { .. } => {}
        }
        self.ghosts.events_folded += 1;
        self.ghosts.last_key = Some(ev.ordering_key());
        self
    }
}

/// One linear pass over `events` (log order). Mints that do not name their
/// collateral token are booked under `default_denomination`.
pub fn fold_ghost_variables(events: &[IndexedEvent], default_denomination: &str) -> GhostVariables {
    events
        .iter()
        .fold(GhostFold::new(default_denomination), GhostFold::step)
        .ghosts
}
