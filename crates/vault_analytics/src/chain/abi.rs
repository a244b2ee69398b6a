//! Event signatures and ABI log decoding for the live-log backend.
//!
//! Decoded logs become [`RawEvent`] records and go through the same
//! normalizer as every other backend.

use crate::events::{EventType, RawEvent, SchemaError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbiType {
    Uint,
    Address,
    Bytes32,
}

#[derive(Clone, Copy, Debug)]
pub struct Param {
    pub name: &'static str,
    pub ty: AbiType,
    pub indexed: bool,
}

const fn p(name: &'static str, ty: AbiType, indexed: bool) -> Param {
    Param { name, ty, indexed }
}

#[derive(Debug)]
pub struct EventSignature {
    pub event_type: EventType,
    pub signature: &'static str,
    /// keccak-256 of `signature`.
    pub topic0: &'static str,
    pub params: &'static [Param],
}

pub static SIGNATURES: &[EventSignature] = &[
    EventSignature {
        event_type: EventType::VaultMinted,
        signature: "VaultMinted(uint256,address,address,uint256,uint256)",
        topic0: "0x93072cc3aa252f3685a6431a06c977e61c8db9a466338202e36ba1c3cb9d8abb",
        params: &[
            p("tokenId", AbiType::Uint, true),
            p("owner", AbiType::Address, true),
            p("treasureContract", AbiType::Address, false),
            p("treasureTokenId", AbiType::Uint, false),
            p("collateral", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::Withdrawn,
        signature: "Withdrawn(uint256,address,uint256)",
        topic0: "0xcf7d23a3cbe4e8b36ff82fd1b05b1b17373dc7804b4ebbd6e2356716ef202372",
        params: &[
            p("tokenId", AbiType::Uint, true),
            p("to", AbiType::Address, true),
            p("amount", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::EarlyRedemption,
        signature: "EarlyRedemption(uint256,address,uint256,uint256)",
        topic0: "0xd7b6b3303d9def1eae1418b085e5c923ee75bf9a2632ca6d7f16b022705e9a71",
        params: &[
            p("tokenId", AbiType::Uint, true),
            p("owner", AbiType::Address, true),
            p("returned", AbiType::Uint, false),
            p("forfeited", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::BtcTokenMinted,
        signature: "BtcTokenMinted(uint256,address,uint256)",
        topic0: "0xf24370ffe1b957f1c2df495ab27a50d044b2970c0002517ca6dc7654d0293a37",
        params: &[
            p("tokenId", AbiType::Uint, true),
            p("to", AbiType::Address, true),
            p("amount", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::BtcTokenReturned,
        signature: "BtcTokenReturned(uint256,address,uint256)",
        topic0: "0x93d7ed56a25d92dd4c44b5b93864c79ae318ac365e210e32ede867b66eda708c",
        params: &[
            p("tokenId", AbiType::Uint, true),
            p("from", AbiType::Address, true),
            p("amount", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::MatchClaimed,
        signature: "MatchClaimed(uint256,uint256)",
        topic0: "0x3949653ae889a2e69269a186d732ddc74891a3046c3e16268858cf9eba6fc365",
        params: &[
            p("tokenId", AbiType::Uint, true),
            p("amount", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::MatchPoolFunded,
        signature: "MatchPoolFunded(uint256,uint256)",
        topic0: "0x0c734055e97311f55b96e95d8e7b9918c6a1ace4e55326cdd1bbf54a75b31215",
        params: &[
            p("amount", AbiType::Uint, false),
            p("newBalance", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::DormantPoked,
        signature: "DormantPoked(uint256,address,address,uint256)",
        topic0: "0x0e27699fd4f858d7e24eca482a16bcf61aec46cea96bd82fd611e6ee09806b02",
        params: &[
            p("tokenId", AbiType::Uint, true),
            p("owner", AbiType::Address, true),
            p("poker", AbiType::Address, true),
            p("graceDeadline", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::DormancyStateChanged,
        signature: "DormancyStateChanged(uint256,uint8)",
        topic0: "0x45b370746503d0e82ea7821f549f04db6d52ee3c48106e7ba588fad209f3fba9",
        params: &[
            p("tokenId", AbiType::Uint, true),
            p("newState", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::ActivityProven,
        signature: "ActivityProven(uint256,address)",
        topic0: "0xca18f2d80bf111446dc042180a61f2d6bd506a4f0b043f0180f323fe4e99dfa7",
        params: &[
            p("tokenId", AbiType::Uint, true),
            p("owner", AbiType::Address, true),
        ],
    },
    EventSignature {
        event_type: EventType::DormantCollateralClaimed,
        signature: "DormantCollateralClaimed(uint256,address,address,uint256)",
        topic0: "0x9b5dc29c756c31a2ed5d565f63cdd9b684b3e2ccf4ac436cb9eabf4a5feb94d9",
        params: &[
            p("tokenId", AbiType::Uint, true),
            p("originalOwner", AbiType::Address, true),
            p("claimer", AbiType::Address, true),
            p("collateralClaimed", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::WithdrawalDelegateGranted,
        signature: "WithdrawalDelegateGranted(uint256,address,uint256)",
        topic0: "0x873a064f8201da4e1ff0882571b4b23bf2d89dc4ce97ac7fd3c18d8555fbe023",
        params: &[
            p("tokenId", AbiType::Uint, true),
            p("delegate", AbiType::Address, true),
            p("percentageBPS", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::WithdrawalDelegateRevoked,
        signature: "WithdrawalDelegateRevoked(uint256,address)",
        topic0: "0xa7f2b3fea9ac1e4a74408dd04eca8d21129891b8bb1a311317a2eb56af087e4e",
        params: &[
            p("tokenId", AbiType::Uint, true),
            p("delegate", AbiType::Address, true),
        ],
    },
    EventSignature {
        event_type: EventType::AllWithdrawalDelegatesRevoked,
        signature: "AllWithdrawalDelegatesRevoked(uint256)",
        topic0: "0x54202b8781cd584b1bdfb903c56f75ed6bcbd761a18ead4129e05a65f654ef72",
        params: &[
            p("tokenId", AbiType::Uint, true),
        ],
    },
    EventSignature {
        event_type: EventType::DelegatedWithdrawal,
        signature: "DelegatedWithdrawal(uint256,address,uint256)",
        topic0: "0xcb2232f75c45893efdf251b85a49b3b1643d2a4f4c93db9554ea0208daeb9f82",
        params: &[
            p("tokenId", AbiType::Uint, true),
            p("delegate", AbiType::Address, true),
            p("amount", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::MinterAchievementClaimed,
        signature: "MinterAchievementClaimed(address,uint256)",
        topic0: "0xa6567958c36965a5f6fb06b4ac412664600f339e56a6905cf86b2c1f5864edd6",
        params: &[
            p("wallet", AbiType::Address, true),
            p("vaultId", AbiType::Uint, true),
        ],
    },
    EventSignature {
        event_type: EventType::MaturedAchievementClaimed,
        signature: "MaturedAchievementClaimed(address,uint256)",
        topic0: "0xe3f4074af885ea1928f471a4063eac3e8a342214545e057ed04b7945e2887ffd",
        params: &[
            p("wallet", AbiType::Address, true),
            p("vaultId", AbiType::Uint, true),
        ],
    },
    EventSignature {
        event_type: EventType::DurationAchievementClaimed,
        signature: "DurationAchievementClaimed(address,uint256,bytes32)",
        topic0: "0x59d1d7f4e1043c9a946d760dafa8000ffbc343e93c1c8a6b9b0dfd4844faa605",
        params: &[
            p("wallet", AbiType::Address, true),
            p("vaultId", AbiType::Uint, true),
            p("achievementType", AbiType::Bytes32, true),
        ],
    },
    EventSignature {
        event_type: EventType::HodlerSupremeVaultMinted,
        signature: "HodlerSupremeVaultMinted(address,uint256,uint256,uint256)",
        topic0: "0x90f0c651d07d302d761d387c103017e19d3039c3a44f11d81cc62e31308df80a",
        params: &[
            p("wallet", AbiType::Address, true),
            p("vaultId", AbiType::Uint, true),
            p("treasureId", AbiType::Uint, false),
            p("collateralAmount", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::DutchAuctionCreated,
        signature: "DutchAuctionCreated(uint256,uint256,uint256,uint256,uint256,uint256)",
        topic0: "0x48e6572844b8e3770432137be0e976047b6982634a349b351e37f5ff8a02cf16",
        params: &[
            p("auctionId", AbiType::Uint, true),
            p("maxSupply", AbiType::Uint, false),
            p("startPrice", AbiType::Uint, false),
            p("floorPrice", AbiType::Uint, false),
            p("startTime", AbiType::Uint, false),
            p("endTime", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::DutchPurchase,
        signature: "DutchPurchase(uint256,address,uint256,uint256,uint256)",
        topic0: "0xeb0b5ea39c828fb0c08f397bc5c699d3b5a7d3ae1004d98c067f8195ec674e10",
        params: &[
            p("auctionId", AbiType::Uint, true),
            p("buyer", AbiType::Address, true),
            p("price", AbiType::Uint, false),
            p("vaultId", AbiType::Uint, false),
            p("treasureId", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::EnglishAuctionCreated,
        signature: "EnglishAuctionCreated(uint256,uint256,uint256,uint256,uint256)",
        topic0: "0xcade0918e728bd2ffa0151bbc6adce79d4510a56405913916fc31a4010394c3d",
        params: &[
            p("auctionId", AbiType::Uint, true),
            p("maxSupply", AbiType::Uint, false),
            p("reservePrice", AbiType::Uint, false),
            p("startTime", AbiType::Uint, false),
            p("endTime", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::BidPlaced,
        signature: "BidPlaced(uint256,uint256,address,uint256)",
        topic0: "0x6f7e354ea3ab5c288aea37fce29c603f9a98a3b040f6d8f32f10e192ec47ff6a",
        params: &[
            p("auctionId", AbiType::Uint, true),
            p("slot", AbiType::Uint, true),
            p("bidder", AbiType::Address, true),
            p("amount", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::BidRefunded,
        signature: "BidRefunded(uint256,uint256,address,uint256)",
        topic0: "0x1482d6e51ee58f33a2f4cfa47ed508eb7fcc2889d5750d79c766f1fa394e74cd",
        params: &[
            p("auctionId", AbiType::Uint, true),
            p("slot", AbiType::Uint, true),
            p("bidder", AbiType::Address, true),
            p("amount", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::SlotSettled,
        signature: "SlotSettled(uint256,uint256,address,uint256,uint256,uint256)",
        topic0: "0x67b80d3da4ccc7e9ad0d008b8c2ad98337d2abf3751530756ef642656c034eb8",
        params: &[
            p("auctionId", AbiType::Uint, true),
            p("slot", AbiType::Uint, true),
            p("winner", AbiType::Address, true),
            p("vaultId", AbiType::Uint, false),
            p("treasureId", AbiType::Uint, false),
            p("winningBid", AbiType::Uint, false),
        ],
    },
    EventSignature {
        event_type: EventType::AuctionFinalized,
        signature: "AuctionFinalized(uint256)",
        topic0: "0x2d7633a748a750b559b97738629efd586b561319b152bb42ba14d590706d31da",
        params: &[
            p("auctionId", AbiType::Uint, true),
        ],
    },
];

pub fn signature_for(event_type: EventType) -> Option<&'static EventSignature> {
    SIGNATURES.iter().find(|s| s.event_type == event_type)
}

pub fn signature_by_topic(topic0: &str) -> Option<&'static EventSignature> {
    SIGNATURES
        .iter()
        .find(|s| s.topic0.eq_ignore_ascii_case(topic0))
}

/// topic0 values for `types`; all known events when `types` is empty.
pub fn topics_for(types: &[EventType]) -> Vec<&'static str> {
    SIGNATURES
        .iter()
        .filter(|s| types.is_empty() || types.contains(&s.event_type))
        .map(|s| s.topic0)
        .collect()
}

/// Log object as returned by `eth_getLogs`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    pub block_number: Option<String>,
    /// Optional; some nodes include it.
    #[serde(default)]
    pub block_timestamp: Option<String>,
    pub transaction_hash: Option<String>,
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

fn word_bytes(field: &str, hex_word: &str) -> Result<[u8; 32], SchemaError> {
    let digits = hex_word.trim_start_matches("0x");
    let bytes = hex::decode(digits).map_err(|_| SchemaError::InvalidHash {
        field: field.to_string(),
        value: hex_word.to_string(),
    })?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| SchemaError::InvalidHash {
        field: field.to_string(),
        value: hex_word.to_string(),
    })
}

fn decode_word(param: &Param, word: &[u8; 32]) -> Result<Value, SchemaError> {
    match param.ty {
        AbiType::Uint => {
            if word[..16].iter().any(|b| *b != 0) {
                return Err(SchemaError::Overflow {
                    field: param.name.to_string(),
                    value: format!("0x{}", hex::encode(word)),
                });
            }
            let mut low = [0u8; 16];
            low.copy_from_slice(&word[16..]);
            Ok(Value::String(u128::from_be_bytes(low).to_string()))
        }
        AbiType::Address => Ok(Value::String(format!("0x{}", hex::encode(&word[12..])))),
        AbiType::Bytes32 => Ok(Value::String(format!("0x{}", hex::encode(word)))),
    }
}

/// Decode one log. `Ok(None)` for logs that are not vault events or were removed by a reorg.
pub fn decode_log(log: &RpcLog, block_timestamp: Option<u64>) -> Result<Option<RawEvent>, SchemaError> {
    if log.removed {
        return Ok(None);
    }
    let Some(sig) = log.topics.first().and_then(|t| signature_by_topic(t)) else {
        return Ok(None);
    };
    let kind = sig.event_type.as_str();
    let missing = |field: &str| SchemaError::MissingField {
        kind: kind.to_string(),
        field: field.to_string(),
    };

    let data = log.data.trim_start_matches("0x");
    let data = hex::decode(data).map_err(|_| SchemaError::InvalidInteger {
        field: "data".to_string(),
        value: log.data.clone(),
    })?;
    let mut topics = log.topics.iter().skip(1);
    let mut words = data.chunks_exact(32);

    let mut raw = RawEvent::new(kind);
    for param in sig.params {
        let word = if param.indexed {
            let topic = topics.next().ok_or_else(|| missing(param.name))?;
            word_bytes(param.name, topic)?
        } else {
            let chunk = words.next().ok_or_else(|| missing(param.name))?;
            let mut w = [0u8; 32];
            w.copy_from_slice(chunk);
            w
        };
        raw.fields
            .insert(param.name.to_string(), decode_word(param, &word)?);
    }

    let block_number = log.block_number.clone().ok_or_else(|| missing("blockNumber"))?;
    let timestamp = match (&log.block_timestamp, block_timestamp) {
        (Some(ts), _) => Value::String(ts.clone()),
        (None, Some(ts)) => Value::from(ts),
        (None, None) => return Err(missing("blockTimestamp")),
    };
    raw = raw
        .with("blockNumber", block_number)
        .with("blockTimestamp", timestamp)
        .with(
            "transactionHash",
            log.transaction_hash
                .clone()
                .ok_or_else(|| missing("transactionHash"))?,
        )
        .with(
            "logIndex",
            log.log_index.clone().ok_or_else(|| missing("logIndex"))?,
        );
    Ok(Some(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{normalize, EventKind};

    fn word_u(v: u128) -> String {
        format!("{:064x}", v)
    }

    fn word_addr(byte: &str) -> String {
        format!("0x{}{}", "0".repeat(24), byte.repeat(20))
    }

    #[test]
    fn signature_table_is_complete_and_unique() {
        assert_eq!(SIGNATURES.len(), EventType::ALL.len());
        for t in EventType::ALL {
            let sig = signature_for(t).unwrap();
            assert_eq!(sig.topic0.len(), 66);
            assert!(sig.signature.starts_with(t.as_str()));
        }
        let mut topics = topics_for(&[]);
        topics.sort_unstable();
        topics.dedup();
        assert_eq!(topics.len(), 26);
        assert_eq!(topics_for(&[EventType::Withdrawn]).len(), 1);
    }

    #[test]
    fn decodes_vault_minted_log() {
        let sig = signature_for(EventType::VaultMinted).unwrap();
        let log = RpcLog {
            address: "0x5fbdb2315678afecb367f032d93f642f64180aa3".into(),
            topics: vec![
                sig.topic0.to_string(),
                format!("0x{}", word_u(7)),
                word_addr("ab"),
            ],
            data: format!(
                "0x{}{}{}",
                &word_addr("cd")[2..],
                word_u(3),
                word_u(150_000_000)
            ),
            block_number: Some("0x2a".into()),
            block_timestamp: None,
            transaction_hash: Some(format!("0x{}", "12".repeat(32))),
            log_index: Some("0x1".into()),
            removed: false,
        };
        let raw = decode_log(&log, Some(1_700_000_000)).unwrap().unwrap();
        let ev = normalize(&raw).unwrap();
        assert_eq!(ev.meta.block_number, 42);
        assert_eq!(ev.meta.block_timestamp, 1_700_000_000);
        assert_eq!(ev.meta.log_index, 1);
        match ev.kind {
            EventKind::VaultMinted {
                token_id,
                owner,
                treasure_contract,
                treasure_token_id,
                collateral,
                ..
            } => {
                assert_eq!(token_id, 7);
                assert_eq!(owner, format!("0x{}", "ab".repeat(20)));
                assert_eq!(treasure_contract, format!("0x{}", "cd".repeat(20)));
                assert_eq!(treasure_token_id, 3);
                assert_eq!(collateral, 150_000_000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn foreign_and_removed_logs_are_skipped() {
        let transfer = RpcLog {
            address: "0x00".into(),
            topics: vec![
                "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef".into(),
            ],
            data: "0x".into(),
            block_number: Some("0x1".into()),
            block_timestamp: None,
            transaction_hash: None,
            log_index: None,
            removed: false,
        };
        assert!(decode_log(&transfer, None).unwrap().is_none());
        let mut removed = transfer.clone();
        removed.topics = vec![signature_for(EventType::AuctionFinalized)
            .unwrap()
            .topic0
            .to_string()];
        removed.removed = true;
        assert!(decode_log(&removed, None).unwrap().is_none());
    }

    #[test]
    fn oversized_uint_is_overflow() {
        let sig = signature_for(EventType::MatchPoolFunded).unwrap();
        let log = RpcLog {
            address: "0x00".into(),
            topics: vec![sig.topic0.to_string()],
            data: format!("0x{}{}", "f".repeat(64), word_u(1)),
            block_number: Some("0x1".into()),
            block_timestamp: Some("0x10".into()),
            transaction_hash: Some(format!("0x{}", "12".repeat(32))),
            log_index: Some("0x0".into()),
            removed: false,
        };
        assert!(matches!(
            decode_log(&log, None),
            Err(SchemaError::Overflow { .. })
        ));
    }

    #[test]
    fn short_data_is_missing_field() {
        let sig = signature_for(EventType::Withdrawn).unwrap();
        let log = RpcLog {
            address: "0x00".into(),
            topics: vec![sig.topic0.to_string(), format!("0x{}", word_u(1)), word_addr("aa")],
            data: "0x".into(),
            block_number: Some("0x1".into()),
            block_timestamp: Some("0x10".into()),
            transaction_hash: Some(format!("0x{}", "12".repeat(32))),
            log_index: Some("0x0".into()),
            removed: false,
        };
        assert!(matches!(
            decode_log(&log, None),
            Err(SchemaError::MissingField { .. })
        ));
    }
}
