//! Canonical event envelope, vault record, and ordering keys.

use super::amount::{decimal, seconds};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lowercase `0x`-prefixed 20-byte hex address.
pub type Address = String;

/// A collateral vault as seen at one point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vault {
    #[serde(with = "decimal")]
    pub token_id: u128,
    pub owner: Address,
    pub treasure_contract: Address,
    #[serde(with = "decimal")]
    pub treasure_token_id: u128,
    pub collateral_token: Address,
    #[serde(with = "decimal")]
    pub collateral_amount: u128,
    #[serde(with = "seconds")]
    pub mint_timestamp: u64,
    #[serde(with = "seconds")]
    pub last_withdrawal: u64,
    /// Portion of collateral represented by the separated fungible token.
    #[serde(with = "decimal")]
    pub vested_amount: u128,
    #[serde(with = "seconds")]
    pub last_activity: u64,
    /// 0 when no poke is outstanding.
    #[serde(with = "seconds")]
    pub poke_timestamp: u64,
    #[serde(with = "decimal")]
    pub window_id: u128,
    pub issuer: Address,
}

/// Dormancy state of a vault. Codes 0/1/2 on-chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DormancyState {
    Active,
    PokePending,
    Claimable,
}

impl DormancyState {
    pub const ALL: [DormancyState; 3] = [Self::Active, Self::PokePending, Self::Claimable];

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Active),
            1 => Some(Self::PokePending),
            2 => Some(Self::Claimable),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PokePending => "poke_pending",
            Self::Claimable => "claimable",
        }
    }
}

impl FromStr for DormancyState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "poke_pending" | "pokepending" => Ok(Self::PokePending),
            "claimable" => Ok(Self::Claimable),
            other => Err(format!("unknown dormancy state: {other}")),
        }
    }
}

/// Position of an event in the canonical chain view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderingKey {
    pub block_number: u64,
    pub log_index: u32,
}

/// Deduplication key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub transaction_hash: String,
    pub log_index: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    #[serde(with = "seconds")]
    pub block_number: u64,
    #[serde(with = "seconds")]
    pub block_timestamp: u64,
    pub transaction_hash: String,
    pub log_index: u32,
}

/// Kind-specific payload. Serialized with a `"type"` tag next to the metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum EventKind {
    VaultMinted {
        #[serde(with = "decimal")]
        token_id: u128,
        owner: Address,
        treasure_contract: Address,
        #[serde(with = "decimal")]
        treasure_token_id: u128,
        #[serde(with = "decimal")]
        collateral: u128,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collateral_token: Option<Address>,
    },
    Withdrawn {
        #[serde(with = "decimal")]
        token_id: u128,
        to: Address,
        #[serde(with = "decimal")]
        amount: u128,
    },
    EarlyRedemption {
        #[serde(with = "decimal")]
        token_id: u128,
        owner: Address,
        #[serde(with = "decimal")]
        returned: u128,
        #[serde(with = "decimal")]
        forfeited: u128,
    },
    BtcTokenMinted {
        #[serde(with = "decimal")]
        token_id: u128,
        to: Address,
        #[serde(with = "decimal")]
        amount: u128,
    },
    BtcTokenReturned {
        #[serde(with = "decimal")]
        token_id: u128,
        from: Address,
        #[serde(with = "decimal")]
        amount: u128,
    },
    MatchClaimed {
        #[serde(with = "decimal")]
        token_id: u128,
        #[serde(with = "decimal")]
        amount: u128,
    },
    MatchPoolFunded {
        #[serde(with = "decimal")]
        amount: u128,
        #[serde(with = "decimal")]
        new_balance: u128,
    },
    DormantPoked {
        #[serde(with = "decimal")]
        token_id: u128,
        owner: Address,
        poker: Address,
        #[serde(with = "seconds")]
        grace_deadline: u64,
    },
    DormancyStateChanged {
        #[serde(with = "decimal")]
        token_id: u128,
        new_state: DormancyState,
    },
    ActivityProven {
        #[serde(with = "decimal")]
        token_id: u128,
        owner: Address,
    },
    DormantCollateralClaimed {
        #[serde(with = "decimal")]
        token_id: u128,
        original_owner: Address,
        claimer: Address,
        #[serde(with = "decimal")]
        collateral_claimed: u128,
    },
    WithdrawalDelegateGranted {
        #[serde(with = "decimal")]
        token_id: u128,
        delegate: Address,
        #[serde(rename = "percentageBPS")]
        percentage_bps: u32,
    },
    WithdrawalDelegateRevoked {
        #[serde(with = "decimal")]
        token_id: u128,
        delegate: Address,
    },
    AllWithdrawalDelegatesRevoked {
        #[serde(with = "decimal")]
        token_id: u128,
    },
    DelegatedWithdrawal {
        #[serde(with = "decimal")]
        token_id: u128,
        delegate: Address,
        #[serde(with = "decimal")]
        amount: u128,
    },
    MinterAchievementClaimed {
        wallet: Address,
        #[serde(with = "decimal")]
        vault_id: u128,
    },
    MaturedAchievementClaimed {
        wallet: Address,
        #[serde(with = "decimal")]
        vault_id: u128,
    },
    DurationAchievementClaimed {
        wallet: Address,
        #[serde(with = "decimal")]
        vault_id: u128,
        /// bytes32 hex.
        achievement_type: String,
    },
    HodlerSupremeVaultMinted {
        wallet: Address,
        #[serde(with = "decimal")]
        vault_id: u128,
        #[serde(with = "decimal")]
        treasure_id: u128,
        #[serde(with = "decimal")]
        collateral_amount: u128,
    },
    DutchAuctionCreated {
        #[serde(with = "decimal")]
        auction_id: u128,
        #[serde(with = "decimal")]
        max_supply: u128,
        #[serde(with = "decimal")]
        start_price: u128,
        #[serde(with = "decimal")]
        floor_price: u128,
        #[serde(with = "seconds")]
        start_time: u64,
        #[serde(with = "seconds")]
        end_time: u64,
    },
    DutchPurchase {
        #[serde(with = "decimal")]
        auction_id: u128,
        buyer: Address,
        #[serde(with = "decimal")]
        price: u128,
        #[serde(with = "decimal")]
        vault_id: u128,
        #[serde(with = "decimal")]
        treasure_id: u128,
    },
    EnglishAuctionCreated {
        #[serde(with = "decimal")]
        auction_id: u128,
        #[serde(with = "decimal")]
        max_supply: u128,
        #[serde(with = "decimal")]
        reserve_price: u128,
        #[serde(with = "seconds")]
        start_time: u64,
        #[serde(with = "seconds")]
        end_time: u64,
    },
    BidPlaced {
        #[serde(with = "decimal")]
        auction_id: u128,
        #[serde(with = "decimal")]
        slot: u128,
        bidder: Address,
        #[serde(with = "decimal")]
        amount: u128,
    },
    BidRefunded {
        #[serde(with = "decimal")]
        auction_id: u128,
        #[serde(with = "decimal")]
        slot: u128,
        bidder: Address,
        #[serde(with = "decimal")]
        amount: u128,
    },
    SlotSettled {
        #[serde(with = "decimal")]
        auction_id: u128,
        #[serde(with = "decimal")]
        slot: u128,
        winner: Address,
        #[serde(with = "decimal")]
        vault_id: u128,
        #[serde(with = "decimal")]
        treasure_id: u128,
        #[serde(with = "decimal")]
        winning_bid: u128,
    },
    AuctionFinalized {
        #[serde(with = "decimal")]
        auction_id: u128,
    },
}

/// Fieldless mirror of [`EventKind`], used in filters and topic tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventType {
    VaultMinted,
    Withdrawn,
    EarlyRedemption,
    BtcTokenMinted,
    BtcTokenReturned,
    MatchClaimed,
    MatchPoolFunded,
    DormantPoked,
    DormancyStateChanged,
    ActivityProven,
    DormantCollateralClaimed,
    WithdrawalDelegateGranted,
    WithdrawalDelegateRevoked,
    AllWithdrawalDelegatesRevoked,
    DelegatedWithdrawal,
    MinterAchievementClaimed,
    MaturedAchievementClaimed,
    DurationAchievementClaimed,
    HodlerSupremeVaultMinted,
    DutchAuctionCreated,
    DutchPurchase,
    EnglishAuctionCreated,
    BidPlaced,
    BidRefunded,
    SlotSettled,
    AuctionFinalized,
}

impl EventType {
    pub const ALL: [EventType; 26] = [
        Self::VaultMinted,
        Self::Withdrawn,
        Self::EarlyRedemption,
        Self::BtcTokenMinted,
        Self::BtcTokenReturned,
        Self::MatchClaimed,
        Self::MatchPoolFunded,
        Self::DormantPoked,
        Self::DormancyStateChanged,
        Self::ActivityProven,
        Self::DormantCollateralClaimed,
        Self::WithdrawalDelegateGranted,
        Self::WithdrawalDelegateRevoked,
        Self::AllWithdrawalDelegatesRevoked,
        Self::DelegatedWithdrawal,
        Self::MinterAchievementClaimed,
        Self::MaturedAchievementClaimed,
        Self::DurationAchievementClaimed,
        Self::HodlerSupremeVaultMinted,
        Self::DutchAuctionCreated,
        Self::DutchPurchase,
        Self::EnglishAuctionCreated,
        Self::BidPlaced,
        Self::BidRefunded,
        Self::SlotSettled,
        Self::AuctionFinalized,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VaultMinted => "VaultMinted",
            Self::Withdrawn => "Withdrawn",
            Self::EarlyRedemption => "EarlyRedemption",
            Self::BtcTokenMinted => "BtcTokenMinted",
            Self::BtcTokenReturned => "BtcTokenReturned",
            Self::MatchClaimed => "MatchClaimed",
            Self::MatchPoolFunded => "MatchPoolFunded",
            Self::DormantPoked => "DormantPoked",
            Self::DormancyStateChanged => "DormancyStateChanged",
            Self::ActivityProven => "ActivityProven",
            Self::DormantCollateralClaimed => "DormantCollateralClaimed",
            Self::WithdrawalDelegateGranted => "WithdrawalDelegateGranted",
            Self::WithdrawalDelegateRevoked => "WithdrawalDelegateRevoked",
            Self::AllWithdrawalDelegatesRevoked => "AllWithdrawalDelegatesRevoked",
            Self::DelegatedWithdrawal => "DelegatedWithdrawal",
            Self::MinterAchievementClaimed => "MinterAchievementClaimed",
            Self::MaturedAchievementClaimed => "MaturedAchievementClaimed",
            Self::DurationAchievementClaimed => "DurationAchievementClaimed",
            Self::HodlerSupremeVaultMinted => "HodlerSupremeVaultMinted",
            Self::DutchAuctionCreated => "DutchAuctionCreated",
            Self::DutchPurchase => "DutchPurchase",
            Self::EnglishAuctionCreated => "EnglishAuctionCreated",
            Self::BidPlaced => "BidPlaced",
            Self::BidRefunded => "BidRefunded",
            Self::SlotSettled => "SlotSettled",
            Self::AuctionFinalized => "AuctionFinalized",
        }
    }

    /// Events emitted by the achievement minter rather than the vault contract.
    pub fn is_achievement(self) -> bool {
        matches!(
            self,
            Self::MinterAchievementClaimed
                | Self::MaturedAchievementClaimed
                | Self::DurationAchievementClaimed
                | Self::HodlerSupremeVaultMinted
        )
    }

    pub fn is_auction(self) -> bool {
        matches!(
            self,
            Self::DutchAuctionCreated
                | Self::DutchPurchase
                | Self::EnglishAuctionCreated
                | Self::BidPlaced
                | Self::BidRefunded
                | Self::SlotSettled
                | Self::AuctionFinalized
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {s}"))
    }
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::VaultMinted { .. } => EventType::VaultMinted,
            Self::Withdrawn { .. } => EventType::Withdrawn,
            Self::EarlyRedemption { .. } => EventType::EarlyRedemption,
            Self::BtcTokenMinted { .. } => EventType::BtcTokenMinted,
            Self::BtcTokenReturned { .. } => EventType::BtcTokenReturned,
            Self::MatchClaimed { .. } => EventType::MatchClaimed,
            Self::MatchPoolFunded { .. } => EventType::MatchPoolFunded,
            Self::DormantPoked { .. } => EventType::DormantPoked,
            Self::DormancyStateChanged { .. } => EventType::DormancyStateChanged,
            Self::ActivityProven { .. } => EventType::ActivityProven,
            Self::DormantCollateralClaimed { .. } => EventType::DormantCollateralClaimed,
            Self::WithdrawalDelegateGranted { .. } => EventType::WithdrawalDelegateGranted,
            Self::WithdrawalDelegateRevoked { .. } => EventType::WithdrawalDelegateRevoked,
            Self::AllWithdrawalDelegatesRevoked { .. } => EventType::AllWithdrawalDelegatesRevoked,
            Self::DelegatedWithdrawal { .. } => EventType::DelegatedWithdrawal,
            Self::MinterAchievementClaimed { .. } => EventType::MinterAchievementClaimed,
            Self::MaturedAchievementClaimed { .. } => EventType::MaturedAchievementClaimed,
            Self::DurationAchievementClaimed { .. } => EventType::DurationAchievementClaimed,
            Self::HodlerSupremeVaultMinted { .. } => EventType::HodlerSupremeVaultMinted,
            Self::DutchAuctionCreated { .. } => EventType::DutchAuctionCreated,
            Self::DutchPurchase { .. } => EventType::DutchPurchase,
            Self::EnglishAuctionCreated { .. } => EventType::EnglishAuctionCreated,
            Self::BidPlaced { .. } => EventType::BidPlaced,
            Self::BidRefunded { .. } => EventType::BidRefunded,
            Self::SlotSettled { .. } => EventType::SlotSettled,
            Self::AuctionFinalized { .. } => EventType::AuctionFinalized,
        }
    }

    /// Vault the event refers to, if any.
    pub fn token_id(&self) -> Option<u128> {
        match self {
            Self::VaultMinted { token_id, .. }
            | Self::Withdrawn { token_id, .. }
            | Self::EarlyRedemption { token_id, .. }
            | Self::BtcTokenMinted { token_id, .. }
            | Self::BtcTokenReturned { token_id, .. }
            | Self::MatchClaimed { token_id, .. }
            | Self::DormantPoked { token_id, .. }
            | Self::DormancyStateChanged { token_id, .. }
            | Self::ActivityProven { token_id, .. }
            | Self::DormantCollateralClaimed { token_id, .. }
            | Self::WithdrawalDelegateGranted { token_id, .. }
            | Self::WithdrawalDelegateRevoked { token_id, .. }
            | Self::AllWithdrawalDelegatesRevoked { token_id }
            | Self::DelegatedWithdrawal { token_id, .. } => Some(*token_id),
            Self::MinterAchievementClaimed { vault_id, .. }
            | Self::MaturedAchievementClaimed { vault_id, .. }
            | Self::DurationAchievementClaimed { vault_id, .. }
            | Self::HodlerSupremeVaultMinted { vault_id, .. }
            | Self::DutchPurchase { vault_id, .. }
            | Self::SlotSettled { vault_id, .. } => Some(*vault_id),
            Self::MatchPoolFunded { .. }
            | Self::DutchAuctionCreated { .. }
            | Self::EnglishAuctionCreated { .. }
            | Self::BidPlaced { .. }
            | Self::BidRefunded { .. }
            | Self::AuctionFinalized { .. } => None,
        }
    }

    /// Every address carried in the payload.
    pub fn addresses(&self) -> Vec<&Address> {
        match self {
            Self::VaultMinted {
                owner,
                treasure_contract,
                collateral_token,
                ..
            } => {
                let mut out = vec![owner, treasure_contract];
                if let Some(t) = collateral_token {
                    out.push(t);
                }
                out
            }
            Self::Withdrawn { to, .. } | Self::BtcTokenMinted { to, .. } => vec![to],
            Self::EarlyRedemption { owner, .. } | Self::ActivityProven { owner, .. } => vec![owner],
            Self::BtcTokenReturned { from, .. } => vec![from],
            Self::DormantPoked { owner, poker, .. } => vec![owner, poker],
            Self::DormantCollateralClaimed {
                original_owner,
                claimer,
                ..
            } => vec![original_owner, claimer],
            Self::WithdrawalDelegateGranted { delegate, .. }
            | Self::WithdrawalDelegateRevoked { delegate, .. }
            | Self::DelegatedWithdrawal { delegate, .. } => vec![delegate],
            Self::MinterAchievementClaimed { wallet, .. }
            | Self::MaturedAchievementClaimed { wallet, .. }
            | Self::DurationAchievementClaimed { wallet, .. }
            | Self::HodlerSupremeVaultMinted { wallet, .. } => vec![wallet],
            Self::DutchPurchase { buyer, .. } => vec![buyer],
            Self::BidPlaced { bidder, .. } | Self::BidRefunded { bidder, .. } => vec![bidder],
            Self::SlotSettled { winner, .. } => vec![winner],
            Self::MatchClaimed { .. }
            | Self::MatchPoolFunded { .. }
            | Self::DormancyStateChanged { .. }
            | Self::AllWithdrawalDelegatesRevoked { .. }
            | Self::DutchAuctionCreated { .. }
            | Self::EnglishAuctionCreated { .. }
            | Self::AuctionFinalized { .. } => Vec::new(),
        }
    }
}

/// One normalized ledger event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl IndexedEvent {
    pub fn ordering_key(&self) -> OrderingKey {
        OrderingKey {
            block_number: self.meta.block_number,
            log_index: self.meta.log_index,
        }
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            transaction_hash: self.meta.transaction_hash.clone(),
            log_index: self.meta.log_index,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    pub fn timestamp(&self) -> u64 {
        self.meta.block_timestamp
    }

    pub fn token_id(&self) -> Option<u128> {
        self.kind.token_id()
    }
}
