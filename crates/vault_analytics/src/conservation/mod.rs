//! Cross-ledger conservation checks over ghost variables.
//!
//! All quantities are integers, so any nonzero discrepancy is reported.
//! Nothing here adjusts the totals it is given.

mod ghosts;

pub use ghosts::{
    fold_ghost_variables, CallCounters, DenominationTotals, GhostVariables, MatchPoolTotals,
    VestedTokenTotals,
};

use crate::error::Error;
use crate::events::amount::{decimal, signed};
use crate::events::Address;
use serde::Serialize;
use std::collections::BTreeMap;

/// Ledger name used for the separated-token check.
pub const VESTED_TOKEN_LEDGER: &str = "vested_token";
/// Ledger name used when more was claimed from the match pool than it received.
pub const MATCH_POOL_LEDGER: &str = "match_pool";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DenominationCheck {
    #[serde(with = "decimal")]
    pub locked: u128,
    #[serde(with = "decimal")]
    pub accounted: u128,
    /// `accounted - locked`.
    #[serde(with = "signed")]
    pub discrepancy: i128,
    #[serde(with = "decimal")]
    pub overdrawn: u128,
    #[serde(with = "decimal")]
    pub stranded: u128,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenLedgerCheck {
    #[serde(with = "decimal")]
    pub supply: u128,
    #[serde(with = "decimal")]
    pub vault_side: u128,
    /// `vault_side - supply`.
    #[serde(with = "signed")]
    pub discrepancy: i128,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConservationViolation {
    /// A denomination address, or one of the ledger names above.
    pub ledger: String,
    #[serde(with = "signed")]
    pub discrepancy: i128,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConservationReport {
    pub balanced: bool,
    pub denominations: BTreeMap<Address, DenominationCheck>,
    pub vested_token: TokenLedgerCheck,
    pub violations: Vec<ConservationViolation>,
}

impl ConservationReport {
    /// For callers that abort on the first violation.
    pub fn into_result(self) -> Result<Self, Error> {
        if self.balanced {
            Ok(self)
        } else {
            Err(Error::ConservationViolation(Box::new(self)))
        }
    }
}

/// `a - b` without wrapping. Saturates at the `i128` bounds.
pub(crate) fn signed_diff(a: u128, b: u128) -> i128 {
    if a >= b {
        i128::try_from(a - b).unwrap_or(i128::MAX)
    } else {
        i128::try_from(b - a).map_or(i128::MIN, |d| -d)
    }
}

pub fn calculate_conservation(ghosts: &GhostVariables) -> ConservationReport {
    let mut violations = Vec::new();

    let denominations: BTreeMap<Address, DenominationCheck> = ghosts
        .denominations
        .iter()
        .map(|(denom, t)| {
            let check = DenominationCheck {
                locked: t.locked(),
                accounted: t.accounted(),
                discrepancy: signed_diff(t.accounted(), t.locked()),
                overdrawn: t.overdrawn,
                stranded: t.stranded,
            };
            if check.discrepancy != 0 {
                violations.push(ConservationViolation {
                    ledger: denom.clone(),
                    discrepancy: check.discrepancy,
                    detail: format!(
                        "locked {} (minted {} + matched {}), accounted {} (vaulted {} + withdrawn {} + redeemed {} + dormancy claimed {}), overdrawn {}, stranded {}",
                        check.locked,
                        t.minted,
                        t.matched,
                        check.accounted,
                        t.vaulted,
                        t.withdrawn,
                        t.redeemed,
                        t.dormancy_claimed,
                        t.overdrawn,
                        t.stranded
                    ),
                });
            }
            (denom.clone(), check)
        })
        .collect();

    let token = &ghosts.vested_token;
    let vested_token = TokenLedgerCheck {
        supply: token.supply(),
        vault_side: token.vault_side,
        discrepancy: signed_diff(token.vault_side, token.supply()),
    };
    if vested_token.discrepancy != 0 {
        violations.push(ConservationViolation {
            ledger: VESTED_TOKEN_LEDGER.to_string(),
            discrepancy: vested_token.discrepancy,
            detail: format!(
                "vault side {} vs supply {} (separated {} - recombined {} - burned {})",
                token.vault_side,
                vested_token.supply,
                token.separated,
                token.recombined,
                token.burned_on_claim
            ),
        });
    }

    let pool = &ghosts.match_pool;
    if pool.claimed > pool.funded {
        violations.push(ConservationViolation {
            ledger: MATCH_POOL_LEDGER.to_string(),
            discrepancy: signed_diff(pool.funded, pool.claimed),
            detail: format!("claimed {} exceeds funded {}", pool.claimed, pool.funded),
        });
    }

    ConservationReport {
        balanced: violations.is_empty(),
        denominations,
        vested_token,
        violations,
    }
}

/// Observed on-chain balance of the vault contract against the ledger's view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub denomination: Address,
    /// Vaulted collateral plus the unclaimed match pool.
    #[serde(with = "decimal")]
    pub expected: u128,
    #[serde(with = "decimal")]
    pub observed: u128,
    /// `observed - expected`.
    #[serde(with = "signed")]
    pub discrepancy: i128,
    pub balanced: bool,
}

/// Compare `balanceOf(vault contract)` for `denomination` with the fold.
/// The match pool is held in the same token as the vaults.
pub fn reconcile_observed(
    ghosts: &GhostVariables,
    denomination: &str,
    observed_balance: u128,
) -> Reconciliation {
    let vaulted = ghosts
        .denominations
        .get(denomination)
        .map_or(0, |t| t.vaulted);
    let expected = vaulted.saturating_add(ghosts.match_pool.balance());
    let discrepancy = signed_diff(observed_balance, expected);
    Reconciliation {
        denomination: denomination.to_string(),
        expected,
        observed: observed_balance,
        discrepancy,
        balanced: discrepancy == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, EventMeta, IndexedEvent};

    const BTC: &str = "0x00000000000000000000000000000000000000c0";
    const WHO: &str = "0x00000000000000000000000000000000000000a1";

    fn at(block: u64, kind: EventKind) -> IndexedEvent {
        IndexedEvent {
            meta: EventMeta {
                block_number: block,
                block_timestamp: block * 12,
                transaction_hash: format!("0x{:064x}", block),
                log_index: 0,
            },
            kind,
        }
    }

    fn ledger(withdrawn: u128) -> Vec<IndexedEvent> {
        vec![
            at(
                1,
                EventKind::VaultMinted {
                    token_id: 1,
                    owner: WHO.into(),
                    treasure_contract: WHO.into(),
                    treasure_token_id: 1,
                    collateral: 100,
                    collateral_token: None,
                },
            ),
            at(
                2,
                EventKind::Withdrawn {
                    token_id: 1,
                    to: WHO.into(),
                    amount: withdrawn,
                },
            ),
            at(
                3,
                EventKind::EarlyRedemption {
                    token_id: 1,
                    owner: WHO.into(),
                    returned: 60,
                    forfeited: 0,
                },
            ),
        ]
    }

    #[test]
    fn balanced_ledger_has_zero_discrepancy() {
        let report = calculate_conservation(&fold_ghost_variables(&ledger(40), BTC));
        assert!(report.balanced);
        assert_eq!(report.denominations[BTC].discrepancy, 0);
        assert!(report.violations.is_empty());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn extra_withdrawal_of_five_is_flagged() {
        let report = calculate_conservation(&fold_ghost_variables(&ledger(45), BTC));
        assert!(!report.balanced);
        assert_eq!(report.denominations[BTC].discrepancy, 5);
        assert_eq!(report.denominations[BTC].overdrawn, 5);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].ledger, BTC);
        match report.into_result() {
            Err(Error::ConservationViolation(r)) => assert_eq!(r.violations[0].discrepancy, 5),
            other => panic!("expected violation, got {other:?}"),
        }
    }

    #[test]
    fn closing_with_leftover_collateral_is_flagged() {
        let mut events = ledger(40);
        if let EventKind::EarlyRedemption { returned, .. } = &mut events[2].kind {
            *returned = 50;
        }
        let report = calculate_conservation(&fold_ghost_variables(&events, BTC));
        assert!(!report.balanced);
        assert_eq!(report.denominations[BTC].discrepancy, -10);
        assert_eq!(report.denominations[BTC].stranded, 10);
        assert_eq!(report.denominations[BTC].overdrawn, 0);
    }

    #[test]
    fn unknown_vault_match_claim_is_negative_drift() {
        let mut events = ledger(40);
        events.push(at(4, EventKind::MatchPoolFunded { amount: 10, new_balance: 10 }));
        events.push(at(5, EventKind::MatchClaimed { token_id: 42, amount: 10 }));
        let report = calculate_conservation(&fold_ghost_variables(&events, BTC));
        assert_eq!(report.denominations[BTC].discrepancy, -10);
        assert!(!report.balanced);
    }

    #[test]
    fn token_ledger_drift_is_flagged() {
        let mut ghosts = fold_ghost_variables(&ledger(40), BTC);
        ghosts.vested_token.separated = 10;
        let report = calculate_conservation(&ghosts);
        assert_eq!(report.vested_token.discrepancy, -10);
        assert_eq!(report.violations[0].ledger, VESTED_TOKEN_LEDGER);
    }

    #[test]
    fn signed_diff_saturates() {
        assert_eq!(signed_diff(5, 3), 2);
        assert_eq!(signed_diff(3, 5), -2);
        assert_eq!(signed_diff(u128::MAX, 0), i128::MAX);
        assert_eq!(signed_diff(0, u128::MAX), i128::MIN);
    }

    #[test]
    fn reconcile_includes_pool_balance() {
        let mut ghosts = GhostVariables::default();
        ghosts.denominations.insert(
            BTC.to_string(),
            DenominationTotals {
                vaulted: 70,
                ..Default::default()
            },
        );
        ghosts.match_pool.funded = 30;
        let r = reconcile_observed(&ghosts, BTC, 100);
        assert!(r.balanced);
        let r = reconcile_observed(&ghosts, BTC, 99);
        assert_eq!(r.discrepancy, -1);
    }
}
