//! Validation of backend records into canonical events and vaults.

use super::amount::{parse_u128, parse_u64};
use super::schema::{Address, DormancyState, EventKind, EventMeta, EventType, IndexedEvent, Vault};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{kind}: missing field `{field}`")]
    MissingField { kind: String, field: String },
    #[error("unknown event kind: {0}")]
    UnknownKind(String),
    #[error("invalid integer in `{field}`: {value}")]
    InvalidInteger { field: String, value: String },
    #[error("integer in `{field}` exceeds 128 bits: {value}")]
    Overflow { field: String, value: String },
    #[error("invalid address in `{field}`: {value}")]
    InvalidAddress { field: String, value: String },
    #[error("invalid hash in `{field}`: {value}")]
    InvalidHash { field: String, value: String },
    #[error("invalid dormancy state: {0}")]
    InvalidState(String),
    #[error("unknown achievement type hash: {0}")]
    UnknownAchievement(String),
    #[error("vault {token_id}: {detail}")]
    Invariant { token_id: u128, detail: String },
}

/// Backend record before validation: a `"type"` tag plus loosely typed fields.
///
/// Integers may arrive as JSON numbers or as decimal/hex strings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type", alias = "kind", default)]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RawEvent {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: Some(kind.to_string()),
            fields: Map::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }
}

/// Vault row as returned by the indexing service. Every field is a string.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVault {
    pub id: String,
    pub owner: String,
    pub treasure_contract: String,
    pub treasure_token_id: String,
    pub collateral_token: String,
    pub collateral_amount: String,
    pub mint_timestamp: String,
    pub last_withdrawal: String,
    #[serde(rename = "vestedBTCAmount", alias = "vestedAmount")]
    pub vested_amount: String,
    pub last_activity: String,
    pub poke_timestamp: String,
    pub window_id: String,
    pub issuer: String,
}

/// Lowercase a 20-byte hex address, rejecting anything else.
pub fn normalize_address(field: &str, raw: &str) -> Result<Address, SchemaError> {
    let digits = strip_hex_prefix(raw.trim());
    match hex::decode(digits) {
        Ok(bytes) if bytes.len() == 20 => Ok(format!("0x{}", hex::encode(bytes))),
        _ => Err(SchemaError::InvalidAddress {
            field: field.to_string(),
            value: raw.to_string(),
        }),
    }
}

/// Lowercase a 32-byte hex value (transaction hash, bytes32).
pub fn normalize_hash(field: &str, raw: &str) -> Result<String, SchemaError> {
    let digits = strip_hex_prefix(raw.trim());
    match hex::decode(digits) {
        Ok(bytes) if bytes.len() == 32 => Ok(format!("0x{}", hex::encode(bytes))),
        _ => Err(SchemaError::InvalidHash {
            field: field.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

struct Fields<'a> {
    kind: &'a str,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn raw(&self, field: &str) -> Result<&'a Value, SchemaError> {
        match self.map.get(field) {
            Some(Value::Null) | None => Err(SchemaError::MissingField {
                kind: self.kind.to_string(),
                field: field.to_string(),
            }),
            Some(v) => Ok(v),
        }
    }

    fn text(&self, field: &str) -> Result<String, SchemaError> {
        match self.raw(field)? {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(SchemaError::InvalidInteger {
                field: field.to_string(),
                value: other.to_string(),
            }),
        }
    }

    fn amount(&self, field: &str) -> Result<u128, SchemaError> {
        parse_u128(field, &self.text(field)?)
    }

    fn u64(&self, field: &str) -> Result<u64, SchemaError> {
        parse_u64(field, &self.text(field)?)
    }

    fn u32(&self, field: &str) -> Result<u32, SchemaError> {
        let text = self.text(field)?;
        let v = parse_u64(field, &text)?;
        u32::try_from(v).map_err(|_| SchemaError::Overflow {
            field: field.to_string(),
            value: text,
        })
    }

    fn address(&self, field: &str) -> Result<Address, SchemaError> {
        normalize_address(field, &self.text(field)?)
    }

    fn opt_address(&self, field: &str) -> Result<Option<Address>, SchemaError> {
        match self.map.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.address(field).map(Some),
        }
    }

    fn hash(&self, field: &str) -> Result<String, SchemaError> {
        normalize_hash(field, &self.text(field)?)
    }

    fn dormancy_state(&self, field: &str) -> Result<DormancyState, SchemaError> {
        let text = self.text(field)?;
        if let Ok(code) = parse_u64(field, &text) {
            return DormancyState::from_code(code).ok_or(SchemaError::InvalidState(text));
        }
        text.parse().map_err(|_| SchemaError::InvalidState(text))
    }
}

/// Convert a raw record into a canonical event.
///
/// Ordering fields are copied as given; nothing is reinterpreted.
pub fn normalize(raw: &RawEvent) -> Result<IndexedEvent, SchemaError> {
    let tag = raw.kind.as_deref().ok_or_else(|| SchemaError::MissingField {
        kind: "event".to_string(),
        field: "type".to_string(),
    })?;
    let event_type: EventType = tag
        .parse()
        .map_err(|_| SchemaError::UnknownKind(tag.to_string()))?;
    let f = Fields {
        kind: tag,
        map: &raw.fields,
    };
    let meta = EventMeta {
        block_number: f.u64("blockNumber")?,
        block_timestamp: f.u64("blockTimestamp")?,
        transaction_hash: f.hash("transactionHash")?,
        log_index: f.u32("logIndex")?,
    };
    let kind = match event_type {
        EventType::VaultMinted => EventKind::VaultMinted {
            token_id: f.amount("tokenId")?,
            owner: f.address("owner")?,
            treasure_contract: f.address("treasureContract")?,
            treasure_token_id: f.amount("treasureTokenId")?,
            collateral: f.amount("collateral")?,
            collateral_token: f.opt_address("collateralToken")?,
        },
        EventType::Withdrawn => EventKind::Withdrawn {
            token_id: f.amount("tokenId")?,
            to: f.address("to")?,
            amount: f.amount("amount")?,
        },
        EventType::EarlyRedemption => EventKind::EarlyRedemption {
            token_id: f.amount("tokenId")?,
            owner: f.address("owner")?,
            returned: f.amount("returned")?,
            forfeited: f.amount("forfeited")?,
        },
        EventType::BtcTokenMinted => EventKind::BtcTokenMinted {
            token_id: f.amount("tokenId")?,
            to: f.address("to")?,
            amount: f.amount("amount")?,
        },
        EventType::BtcTokenReturned => EventKind::BtcTokenReturned {
            token_id: f.amount("tokenId")?,
            from: f.address("from")?,
            amount: f.amount("amount")?,
        },
        EventType::MatchClaimed => EventKind::MatchClaimed {
            token_id: f.amount("tokenId")?,
            amount: f.amount("amount")?,
        },
        EventType::MatchPoolFunded => EventKind::MatchPoolFunded {
            amount: f.amount("amount")?,
            new_balance: f.amount("newBalance")?,
        },
        EventType::DormantPoked => EventKind::DormantPoked {
            token_id: f.amount("tokenId")?,
            owner: f.address("owner")?,
            poker: f.address("poker")?,
            grace_deadline: f.u64("graceDeadline")?,
        },
        EventType::DormancyStateChanged => EventKind::DormancyStateChanged {
            token_id: f.amount("tokenId")?,
            new_state: f.dormancy_state("newState")?,
        },
        EventType::ActivityProven => EventKind::ActivityProven {
            token_id: f.amount("tokenId")?,
            owner: f.address("owner")?,
        },
        EventType::DormantCollateralClaimed => EventKind::DormantCollateralClaimed {
            token_id: f.amount("tokenId")?,
            original_owner: f.address("originalOwner")?,
            claimer: f.address("claimer")?,
            collateral_claimed: f.amount("collateralClaimed")?,
        },
        EventType::WithdrawalDelegateGranted => EventKind::WithdrawalDelegateGranted {
            token_id: f.amount("tokenId")?,
            delegate: f.address("delegate")?,
            percentage_bps: f.u32("percentageBPS")?,
        },
        EventType::WithdrawalDelegateRevoked => EventKind::WithdrawalDelegateRevoked {
            token_id: f.amount("tokenId")?,
            delegate: f.address("delegate")?,
        },
        EventType::AllWithdrawalDelegatesRevoked => EventKind::AllWithdrawalDelegatesRevoked {
            token_id: f.amount("tokenId")?,
        },
        EventType::DelegatedWithdrawal => EventKind::DelegatedWithdrawal {
            token_id: f.amount("tokenId")?,
            delegate: f.address("delegate")?,
            amount: f.amount("amount")?,
        },
        EventType::MinterAchievementClaimed => EventKind::MinterAchievementClaimed {
            wallet: f.address("wallet")?,
            vault_id: f.amount("vaultId")?,
        },
        EventType::MaturedAchievementClaimed => EventKind::MaturedAchievementClaimed {
            wallet: f.address("wallet")?,
            vault_id: f.amount("vaultId")?,
        },
        EventType::DurationAchievementClaimed => EventKind::DurationAchievementClaimed {
            wallet: f.address("wallet")?,
            vault_id: f.amount("vaultId")?,
            achievement_type: f.hash("achievementType")?,
        },
        EventType::HodlerSupremeVaultMinted => EventKind::HodlerSupremeVaultMinted {
            wallet: f.address("wallet")?,
            vault_id: f.amount("vaultId")?,
            treasure_id: f.amount("treasureId")?,
            collateral_amount: f.amount("collateralAmount")?,
        },
        EventType::DutchAuctionCreated => EventKind::DutchAuctionCreated {
            auction_id: f.amount("auctionId")?,
            max_supply: f.amount("maxSupply")?,
            start_price: f.amount("startPrice")?,
            floor_price: f.amount("floorPrice")?,
            start_time: f.u64("startTime")?,
            end_time: f.u64("endTime")?,
        },
        EventType::DutchPurchase => EventKind::DutchPurchase {
            auction_id: f.amount("auctionId")?,
            buyer: f.address("buyer")?,
            price: f.amount("price")?,
            vault_id: f.amount("vaultId")?,
            treasure_id: f.amount("treasureId")?,
        },
        EventType::EnglishAuctionCreated => EventKind::EnglishAuctionCreated {
            auction_id: f.amount("auctionId")?,
            max_supply: f.amount("maxSupply")?,
            reserve_price: f.amount("reservePrice")?,
            start_time: f.u64("startTime")?,
            end_time: f.u64("endTime")?,
        },
        EventType::BidPlaced => EventKind::BidPlaced {
            auction_id: f.amount("auctionId")?,
            slot: f.amount("slot")?,
            bidder: f.address("bidder")?,
            amount: f.amount("amount")?,
        },
        EventType::BidRefunded => EventKind::BidRefunded {
            auction_id: f.amount("auctionId")?,
            slot: f.amount("slot")?,
            bidder: f.address("bidder")?,
            amount: f.amount("amount")?,
        },
        EventType::SlotSettled => EventKind::SlotSettled {
            auction_id: f.amount("auctionId")?,
            slot: f.amount("slot")?,
            winner: f.address("winner")?,
            vault_id: f.amount("vaultId")?,
            treasure_id: f.amount("treasureId")?,
            winning_bid: f.amount("winningBid")?,
        },
        EventType::AuctionFinalized => EventKind::AuctionFinalized {
            auction_id: f.amount("auctionId")?,
        },
    };
    Ok(IndexedEvent { meta, kind })
}

/// Convert an indexing-service vault row into a [`Vault`].
pub fn normalize_vault(raw: &RawVault) -> Result<Vault, SchemaError> {
    let vault = Vault {
        token_id: parse_u128("id", &raw.id)?,
        owner: normalize_address("owner", &raw.owner)?,
        treasure_contract: normalize_address("treasureContract", &raw.treasure_contract)?,
        treasure_token_id: parse_u128("treasureTokenId", &raw.treasure_token_id)?,
        collateral_token: normalize_address("collateralToken", &raw.collateral_token)?,
        collateral_amount: parse_u128("collateralAmount", &raw.collateral_amount)?,
        mint_timestamp: parse_u64("mintTimestamp", &raw.mint_timestamp)?,
        last_withdrawal: parse_u64("lastWithdrawal", &raw.last_withdrawal)?,
        vested_amount: parse_u128("vestedBTCAmount", &raw.vested_amount)?,
        last_activity: parse_u64("lastActivity", &raw.last_activity)?,
        poke_timestamp: parse_u64("pokeTimestamp", &raw.poke_timestamp)?,
        window_id: parse_u128("windowId", &raw.window_id)?,
        issuer: normalize_address("issuer", &raw.issuer)?,
    };
    if vault.vested_amount > vault.collateral_amount {
        return Err(SchemaError::Invariant {
            token_id: vault.token_id,
            detail: format!(
                "vested amount {} exceeds collateral {}",
                vault.vested_amount, vault.collateral_amount
            ),
        });
    }
    Ok(vault)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx() -> String {
        format!("0x{}", "AB".repeat(32))
    }

    fn addr(b: &str) -> String {
        format!("0x{}", b.repeat(20))
    }

    fn base(kind: &str) -> RawEvent {
        RawEvent::new(kind)
            .with("blockNumber", "0x10")
            .with("blockTimestamp", "1700000000")
            .with("transactionHash", tx())
            .with("logIndex", 2)
    }

    #[test]
    fn normalizes_vault_minted() {
        let raw = base("VaultMinted")
            .with("tokenId", "42")
            .with("owner", addr("AA"))
            .with("treasureContract", addr("bb"))
            .with("treasureTokenId", "3")
            .with("collateral", "250000000000000000000000");
        let ev = normalize(&raw).unwrap();
        assert_eq!(ev.meta.block_number, 16);
        assert_eq!(ev.meta.log_index, 2);
        assert_eq!(ev.meta.transaction_hash, tx().to_lowercase());
        match ev.kind {
            EventKind::VaultMinted {
                token_id,
                owner,
                collateral,
                collateral_token,
                ..
            } => {
                assert_eq!(token_id, 42);
                assert_eq!(owner, addr("aa"));
                assert_eq!(collateral, 250_000_000_000_000_000_000_000);
                assert!(collateral_token.is_none());
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn missing_field_is_schema_error() {
        let raw = base("Withdrawn").with("tokenId", "1").with("to", addr("aa"));
        assert_eq!(
            normalize(&raw).unwrap_err(),
            SchemaError::MissingField {
                kind: "Withdrawn".into(),
                field: "amount".into()
            }
        );
        let no_meta = RawEvent::new("AuctionFinalized").with("auctionId", "1");
        assert!(matches!(
            normalize(&no_meta),
            Err(SchemaError::MissingField { .. })
        ));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let raw = base("Transfer");
        assert_eq!(
            normalize(&raw).unwrap_err(),
            SchemaError::UnknownKind("Transfer".into())
        );
        let untagged = RawEvent::default();
        assert!(matches!(
            normalize(&untagged),
            Err(SchemaError::MissingField { .. })
        ));
    }

    #[test]
    fn dormancy_state_codes() {
        let ok = base("DormancyStateChanged")
            .with("tokenId", "1")
            .with("newState", 2);
        match normalize(&ok).unwrap().kind {
            EventKind::DormancyStateChanged { new_state, .. } => {
                assert_eq!(new_state, DormancyState::Claimable)
            }
            other => panic!("unexpected kind {other:?}"),
        }
        let named = base("DormancyStateChanged")
            .with("tokenId", "1")
            .with("newState", "poke_pending");
        assert!(normalize(&named).is_ok());
        let bad = base("DormancyStateChanged")
            .with("tokenId", "1")
            .with("newState", 3);
        assert!(matches!(
            normalize(&bad),
            Err(SchemaError::InvalidState(_))
        ));
    }

    #[test]
    fn bad_address_is_rejected() {
        let raw = base("ActivityProven")
            .with("tokenId", "1")
            .with("owner", "0x1234");
        assert!(matches!(
            normalize(&raw),
            Err(SchemaError::InvalidAddress { .. })
        ));
    }

    fn raw_vault() -> RawVault {
        RawVault {
            id: "9".into(),
            owner: addr("Aa"),
            treasure_contract: addr("bb"),
            treasure_token_id: "1".into(),
            collateral_token: addr("cc"),
            collateral_amount: "100000000".into(),
            mint_timestamp: "1700000000".into(),
            last_withdrawal: "0".into(),
            vested_amount: "0".into(),
            last_activity: "1700000000".into(),
            poke_timestamp: "0".into(),
            window_id: "0".into(),
            issuer: addr("dd"),
        }
    }

    #[test]
    fn vault_rows_normalize_and_check_invariant() {
        let v = normalize_vault(&raw_vault()).unwrap();
        assert_eq!(v.token_id, 9);
        assert_eq!(v.owner, addr("aa"));
        let mut bad = raw_vault();
        bad.vested_amount = "100000001".into();
        assert!(matches!(
            normalize_vault(&bad),
            Err(SchemaError::Invariant { token_id: 9, .. })
        ));
    }

    #[test]
    fn raw_vault_accepts_indexer_field_names() {
        let json = serde_json::json!({
            "id": "1", "owner": addr("aa"), "treasureContract": addr("bb"),
            "treasureTokenId": "0", "collateralToken": addr("cc"),
            "collateralAmount": "5", "mintTimestamp": "1", "lastWithdrawal": "0",
            "vestedBTCAmount": "2", "lastActivity": "1", "pokeTimestamp": "0",
            "windowId": "0", "issuer": addr("dd")
        });
        let raw: RawVault = serde_json::from_value(json).unwrap();
        assert_eq!(normalize_vault(&raw).unwrap().vested_amount, 2);
    }
}
