//! Vault scope and status filters.

use super::status::{dormancy_state, is_separated, is_vested};
use crate::events::{Address, DormancyState, Vault};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which vaults form the population: everything, one issuer, or one treasure contract.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "address", rename_all = "snake_case")]
pub enum ScopeFilter {
    #[default]
    All,
    Issuer(Address),
    Treasure(Address),
}

impl ScopeFilter {
    pub fn matches(&self, vault: &Vault) -> bool {
        match self {
            Self::All => true,
            Self::Issuer(a) => vault.issuer.eq_ignore_ascii_case(a),
            Self::Treasure(a) => vault.treasure_contract.eq_ignore_ascii_case(a),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VestingFilter {
    Vesting,
    Vested,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeparationFilter {
    Combined,
    Separated,
}

impl FromStr for VestingFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vesting" => Ok(Self::Vesting),
            "vested" => Ok(Self::Vested),
            other => Err(format!("unknown vesting filter: {other}")),
        }
    }
}

impl FromStr for SeparationFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "combined" => Ok(Self::Combined),
            "separated" => Ok(Self::Separated),
            other => Err(format!("unknown separation filter: {other}")),
        }
    }
}

/// Status criteria. Unset criteria match everything; set ones must all hold.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultFilter {
    pub vesting: Option<VestingFilter>,
    pub separation: Option<SeparationFilter>,
    /// Empty means any state.
    #[serde(default)]
    pub dormancy: Vec<DormancyState>,
}

impl VaultFilter {
    pub fn is_empty(&self) -> bool {
        self.vesting.is_none() && self.separation.is_none() && self.dormancy.is_empty()
    }

    pub fn matches(&self, vault: &Vault, now: u64) -> bool {
        if let Some(want) = self.vesting {
            if is_vested(vault, now) != (want == VestingFilter::Vested) {
                return false;
            }
        }
        if let Some(want) = self.separation {
            if is_separated(vault) != (want == SeparationFilter::Separated) {
                return false;
            }
        }
        self.dormancy.is_empty() || self.dormancy.contains(&dormancy_state(vault, now))
    }
}

pub fn filter_vaults(vaults: Vec<Vault>, scope: &ScopeFilter, filter: &VaultFilter, now: u64) -> Vec<Vault> {
    vaults
        .into_iter()
        .filter(|v| scope.matches(v) && filter.matches(v, now))
        .collect()
}
