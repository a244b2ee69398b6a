//! Vault state folded from the event log.
//!
//! Backends that only expose logs (live node, recorded files) derive their
//! vault snapshots here, and the retention matrix replays log prefixes with it.

use super::schema::{Address, DormancyState, EventKind, IndexedEvent, Vault};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureKind {
    EarlyRedemption,
    DormancyClaim,
}

/// How and when a vault left the open set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
    pub kind: ClosureKind,
    pub at: u64,
    pub mint_timestamp: u64,
}

/// Open vaults and closures replayed from the log.
///
/// Mint events carry no issuer, so a log-derived vault reports its treasure
/// contract as `issuer`. On log-only backends `ScopeFilter::Issuer(a)` and
/// `ScopeFilter::Treasure(a)` select the same vaults.
#[derive(Clone, Debug)]
pub struct VaultLedger {
    open: BTreeMap<u128, Vault>,
    closed: BTreeMap<u128, Closure>,
    default_collateral_token: Address,
}

impl VaultLedger {
    /// `default_collateral_token` is used for mints that do not name their token.
    pub fn new(default_collateral_token: impl Into<Address>) -> Self {
        Self {
            open: BTreeMap::new(),
            closed: BTreeMap::new(),
            default_collateral_token: default_collateral_token.into(),
        }
    }

    pub fn replay<'a>(
        events: impl IntoIterator<Item = &'a IndexedEvent>,
        default_collateral_token: impl Into<Address>,
    ) -> Self {
        let mut ledger = Self::new(default_collateral_token);
        for ev in events {
            ledger.apply(ev);
        }
        ledger
    }

    pub fn apply(&mut self, ev: &IndexedEvent) {
        let ts = ev.meta.block_timestamp;
        match &ev.kind {
            EventKind::VaultMinted {
                token_id,
                owner,
                treasure_contract,
                treasure_token_id,
                collateral,
                collateral_token,
            } => {
                self.closed.remove(token_id);
                self.open.insert(
                    *token_id,
                    Vault {
                        token_id: *token_id,
                        owner: owner.clone(),
                        treasure_contract: treasure_contract.clone(),
                        treasure_token_id: *treasure_token_id,
                        collateral_token: collateral_token
                            .clone()
                            .unwrap_or_else(|| self.default_collateral_token.clone()),
                        collateral_amount: *collateral,
                        mint_timestamp: ts,
                        last_withdrawal: 0,
                        vested_amount: 0,
                        last_activity: ts,
                        poke_timestamp: 0,
                        window_id: 0,
                        issuer: treasure_contract.clone(),
                    },
                );
            }
            EventKind::Withdrawn {
                token_id, amount, ..
            }
            | EventKind::DelegatedWithdrawal {
                token_id, amount, ..
            } => {
                if let Some(v) = self.open.get_mut(token_id) {
                    v.collateral_amount = v.collateral_amount.saturating_sub(*amount);
                    v.vested_amount = v.vested_amount.min(v.collateral_amount);
                    v.last_withdrawal = ts;
                    touch(v, ts);
                }
            }
            EventKind::BtcTokenMinted {
                token_id, amount, ..
            } => {
                if let Some(v) = self.open.get_mut(token_id) {
                    v.vested_amount = v
                        .vested_amount
                        .saturating_add(*amount)
                        .min(v.collateral_amount);
                    touch(v, ts);
                }
            }
            EventKind::BtcTokenReturned {
                token_id, amount, ..
            } => {
                if let Some(v) = self.open.get_mut(token_id) {
                    v.vested_amount = v.vested_amount.saturating_sub(*amount);
                    touch(v, ts);
                }
            }
            EventKind::MatchClaimed { token_id, amount } => {
                if let Some(v) = self.open.get_mut(token_id) {
                    v.collateral_amount = v.collateral_amount.saturating_add(*amount);
                    touch(v, ts);
                }
            }
            EventKind::DormantPoked { token_id, .. } => {
                if let Some(v) = self.open.get_mut(token_id) {
                    v.poke_timestamp = ts;
                }
            }
            EventKind::DormancyStateChanged {
                token_id,
                new_state,
            } => {
                if *new_state == DormancyState::Active {
                    if let Some(v) = self.open.get_mut(token_id) {
                        v.poke_timestamp = 0;
                    }
                }
            }
            EventKind::ActivityProven { token_id, .. }
            | EventKind::WithdrawalDelegateGranted { token_id, .. }
            | EventKind::WithdrawalDelegateRevoked { token_id, .. }
            | EventKind::AllWithdrawalDelegatesRevoked { token_id } => {
                if let Some(v) = self.open.get_mut(token_id) {
                    touch(v, ts);
                }
            }
            EventKind::EarlyRedemption { token_id, .. } => {
                self.close(*token_id, ClosureKind::EarlyRedemption, ts);
            }
            EventKind::DormantCollateralClaimed { token_id, .. } => {
                self.close(*token_id, ClosureKind::DormancyClaim, ts);
            }
            _ => {}
        }
    }

    fn close(&mut self, token_id: u128, kind: ClosureKind, at: u64) {
        if let Some(v) = self.open.remove(&token_id) {
            self.closed.insert(
                token_id,
                Closure {
                    kind,
                    at,
                    mint_timestamp: v.mint_timestamp,
                },
            );
        }
    }

    /// Open vaults in token id order.
    pub fn vaults(&self) -> Vec<Vault> {
        self.open.values().cloned().collect()
    }

    pub fn get(&self, token_id: u128) -> Option<&Vault> {
        self.open.get(&token_id)
    }

    pub fn closure(&self, token_id: u128) -> Option<&Closure> {
        self.closed.get(&token_id)
    }

    pub fn closures(&self) -> impl Iterator<Item = (&u128, &Closure)> {
        self.closed.iter()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

/// Qualifying activity: a total reset of the dormancy clock.
fn touch(v: &mut Vault, ts: u64) {
    v.last_activity = v.last_activity.max(ts);
    v.poke_timestamp = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::schema::EventMeta;

    fn ev(block: u64, ts: u64, kind: EventKind) -> IndexedEvent {
        IndexedEvent {
            meta: EventMeta {
                block_number: block,
                block_timestamp: ts,
                transaction_hash: format!("0x{:064x}", block),
                log_index: 0,
            },
            kind,
        }
    }

    fn a(b: &str) -> String {
        format!("0x{}", b.repeat(20))
    }

    fn mint(block: u64, ts: u64, id: u128, collateral: u128) -> IndexedEvent {
        ev(
            block,
            ts,
            EventKind::VaultMinted {
                token_id: id,
                owner: a("01"),
                treasure_contract: a("02"),
                treasure_token_id: id,
                collateral,
                collateral_token: None,
            },
        )
    }

    #[test]
    fn replay_tracks_collateral_and_separation() {
        let events = vec![
            mint(1, 100, 1, 1_000),
            ev(
                2,
                200,
                EventKind::BtcTokenMinted {
                    token_id: 1,
                    to: a("01"),
                    amount: 400,
                },
            ),
            ev(
                3,
                300,
                EventKind::Withdrawn {
                    token_id: 1,
                    to: a("01"),
                    amount: 100,
                },
            ),
        ];
        let ledger = VaultLedger::replay(&events, a("cc"));
        let v = ledger.get(1).unwrap();
        assert_eq!(v.collateral_amount, 900);
        assert_eq!(v.vested_amount, 400);
        assert_eq!(v.last_withdrawal, 300);
        assert_eq!(v.last_activity, 300);
        assert_eq!(v.collateral_token, a("cc"));
        assert_eq!(v.issuer, a("02"));
    }

    #[test]
    fn issuer_scope_falls_back_to_treasure_contract() {
        use crate::analytics::ScopeFilter;
        let ledger = VaultLedger::replay(&[mint(1, 100, 1, 1_000)], a("cc"));
        let v = ledger.get(1).unwrap();
        assert!(ScopeFilter::Issuer(a("02")).matches(v));
        assert!(ScopeFilter::Treasure(a("02")).matches(v));
        assert!(!ScopeFilter::Issuer(a("01")).matches(v));
    }

    #[test]
    fn activity_clears_poke() {
        let events = vec![
            mint(1, 100, 1, 1_000),
            ev(
                2,
                500,
                EventKind::DormantPoked {
                    token_id: 1,
                    owner: a("01"),
                    poker: a("09"),
                    grace_deadline: 500 + 30 * 86_400,
                },
            ),
        ];
        let mut ledger = VaultLedger::replay(&events, a("cc"));
        assert_eq!(ledger.get(1).unwrap().poke_timestamp, 500);
        ledger.apply(&ev(
            3,
            600,
            EventKind::ActivityProven {
                token_id: 1,
                owner: a("01"),
            },
        ));
        let v = ledger.get(1).unwrap();
        assert_eq!(v.poke_timestamp, 0);
        assert_eq!(v.last_activity, 600);
    }

    #[test]
    fn redemption_and_claim_close_vaults() {
        let events = vec![
            mint(1, 100, 1, 1_000),
            mint(2, 110, 2, 2_000),
            ev(
                3,
                400,
                EventKind::EarlyRedemption {
                    token_id: 1,
                    owner: a("01"),
                    returned: 900,
                    forfeited: 100,
                },
            ),
            ev(
                4,
                500,
                EventKind::DormantCollateralClaimed {
                    token_id: 2,
                    original_owner: a("01"),
                    claimer: a("08"),
                    collateral_claimed: 2_000,
                },
            ),
        ];
        let ledger = VaultLedger::replay(&events, a("cc"));
        assert_eq!(ledger.open_count(), 0);
        assert_eq!(
            ledger.closure(1).map(|c| c.kind),
            Some(ClosureKind::EarlyRedemption)
        );
        assert_eq!(ledger.closure(2).map(|c| c.at), Some(500));
    }
}
