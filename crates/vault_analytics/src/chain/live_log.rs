//! JSON-RPC log polling against a node.

use super::abi::{self, RpcLog};
use super::cache::Cache;
use super::error::{AdapterError, Backend};
use super::transport::{HttpTransport, TransportConfig};
use super::{EventBatch, EventFilter, RejectedRecord, VaultBatch};
use crate::analytics::ScopeFilter;
use crate::events::{parse_u128, parse_u64, Address, VaultLedger};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Blocks behind head after which a log range is treated as final and cached.
const FINALITY_DEPTH: u64 = 12;
const DEFAULT_BLOCK_SPAN: u64 = 10_000;
/// `balanceOf(address)`.
const BALANCE_OF_SELECTOR: &str = "70a08231";

#[derive(Clone, Debug)]
pub struct LiveLogConfig {
    /// Contracts whose logs are requested.
    pub addresses: Vec<Address>,
    pub default_collateral_token: Address,
    pub deployment_block: u64,
    /// Account whose native balance must cover `min_balance` before any work.
    pub probe_account: Option<Address>,
    pub min_balance: u128,
    /// Widest block range sent in one `eth_getLogs`.
    pub max_block_span: u64,
}

impl Default for LiveLogConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            default_collateral_token: crate::config::protocol::ZERO_ADDRESS.to_string(),
            deployment_block: 0,
            probe_account: None,
            min_balance: 0,
            max_block_span: DEFAULT_BLOCK_SPAN,
        }
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

pub struct LiveLogAdapter {
    transport: HttpTransport,
    config: LiveLogConfig,
}

impl LiveLogAdapter {
    pub fn new(
        endpoint: Url,
        config: LiveLogConfig,
        transport: TransportConfig,
        cache: Option<Arc<Cache>>,
    ) -> Result<Self, AdapterError> {
        let backend = Backend::live_log(&endpoint);
        Ok(Self {
            transport: HttpTransport::new(backend, endpoint, transport, cache)?,
            config,
        })
    }

    pub fn backend(&self) -> &Backend {
        self.transport.backend()
    }

    pub fn config(&self) -> &LiveLogConfig {
        &self.config
    }

    async fn call(&self, method: &str, params: Value, cacheable: bool) -> Result<Value, AdapterError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let text = self.transport.post_json(&body, cacheable).await?;
        parse_rpc_response(self.backend(), &text)
    }

    fn quantity(&self, field: &str, value: &Value) -> Result<u128, AdapterError> {
        let text = value
            .as_str()
            .ok_or_else(|| AdapterError::malformed(self.backend(), format!("{field}: expected hex string")))?;
        parse_u128(field, text).map_err(|e| AdapterError::malformed(self.backend(), e))
    }

    pub async fn block_number(&self) -> Result<u64, AdapterError> {
        let v = self.call("eth_blockNumber", json!([]), false).await?;
        let n = self.quantity("blockNumber", &v)?;
        u64::try_from(n).map_err(|_| AdapterError::malformed(self.backend(), "block number overflow"))
    }

    pub async fn balance(&self, account: &str) -> Result<u128, AdapterError> {
        let v = self
            .call("eth_getBalance", json!([account, "latest"]), false)
            .await?;
        self.quantity("balance", &v)
    }

    /// Liveness and minimum-balance check. Fails before any log query when
    /// the node cannot make progress.
    pub async fn precheck(&self) -> Result<(), AdapterError> {
        let head = self.block_number().await?;
        if head < self.config.deployment_block {
            return Err(AdapterError::Precheck {
                backend: self.backend().clone(),
                detail: format!(
                    "node head {head} is below deployment block {}",
                    self.config.deployment_block
                ),
            });
        }
        if let Some(account) = &self.config.probe_account {
            let balance = self.balance(account).await?;
            if balance < self.config.min_balance {
                return Err(AdapterError::Precheck {
                    backend: self.backend().clone(),
                    detail: format!(
                        "balance of {account} is {balance}, need {}",
                        self.config.min_balance
                    ),
                });
            }
        }
        debug!(head, backend = %self.backend(), "precheck passed");
        Ok(())
    }

    /// ERC-20 `balanceOf(holder)` on `token` at the latest block.
    pub async fn read_token_balance(&self, token: &str, holder: &str) -> Result<u128, AdapterError> {
        let data = balance_of_calldata(holder).map_err(|e| AdapterError::malformed(self.backend(), e))?;
        let v = self
            .call("eth_call", json!([{ "to": token, "data": data }, "latest"]), false)
            .await?;
        self.quantity("balanceOf", &v)
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64, AdapterError> {
        let v = self
            .call(
                "eth_getBlockByNumber",
                json!([format!("0x{block:x}"), false]),
                true,
            )
            .await?;
        let ts = v
            .get("timestamp")
            .ok_or_else(|| AdapterError::malformed(self.backend(), format!("block {block}: no timestamp")))?;
        let ts = self.quantity("timestamp", ts)?;
        u64::try_from(ts).map_err(|_| AdapterError::malformed(self.backend(), "timestamp overflow"))
    }

    /// Raw `eth_getLogs` over the configured contracts.
    pub async fn get_logs(
        &self,
        from: u64,
        to: u64,
        topics: &[&str],
        cacheable: bool,
    ) -> Result<Vec<RpcLog>, AdapterError> {
        let filter = json!({
            "address": self.config.addresses,
            "fromBlock": format!("0x{from:x}"),
            "toBlock": format!("0x{to:x}"),
            "topics": [topics],
        });
        let v = self.call("eth_getLogs", json!([filter]), cacheable).await?;
        serde_json::from_value(v).map_err(|e| AdapterError::malformed(self.backend(), e))
    }

    pub async fn fetch_events(&self, filter: &EventFilter) -> Result<EventBatch, AdapterError> {
        let head = self.block_number().await?;
        let from = filter.from_block.max(self.config.deployment_block);
        let to = filter.to_block.map_or(head, |t| t.min(head));
        if from > to {
            return Ok(EventBatch::default());
        }
        let topics = abi::topics_for(&filter.types);
        let span = self.config.max_block_span.max(1);

        let mut logs = Vec::new();
        let mut start = from;
        while start <= to {
            let end = start.saturating_add(span - 1).min(to);
            let cacheable = end.saturating_add(FINALITY_DEPTH) <= head;
            let chunk = self.get_logs(start, end, &topics, cacheable).await?;
            info!(from = start, to = end, count = chunk.len(), "fetched logs");
            logs.extend(chunk);
            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }

        let mut timestamps: BTreeMap<u64, u64> = BTreeMap::new();
        let mut raws = Vec::with_capacity(logs.len());
        let mut rejected = Vec::new();
        for log in &logs {
            let ts = if log.block_timestamp.is_some() {
                None
            } else {
                match log.block_number.as_deref().map(|b| parse_u64("blockNumber", b)) {
                    Some(Ok(block)) => match timestamps.get(&block) {
                        Some(ts) => Some(*ts),
                        None => {
                            let ts = self.block_timestamp(block).await?;
                            timestamps.insert(block, ts);
                            Some(ts)
                        }
                    },
                    _ => None,
                }
            };
            match abi::decode_log(log, ts) {
                Ok(Some(raw)) => raws.push(raw),
                Ok(None) => {}
                Err(error) => rejected.push(RejectedRecord {
                    error,
                    raw: serde_json::to_value(log).unwrap_or_default(),
                }),
            }
        }

        let mut batch = EventBatch::from_raw(raws, filter);
        rejected.append(&mut batch.rejected);
        batch.rejected = rejected;
        Ok(batch)
    }

    /// Current vaults, rebuilt by folding every log since deployment.
    pub async fn fetch_vaults(&self, scope: &ScopeFilter) -> Result<VaultBatch, AdapterError> {
        let batch = self
            .fetch_events(&EventFilter::range(self.config.deployment_block, None))
            .await?;
        let ledger = VaultLedger::replay(&batch.events, self.config.default_collateral_token.as_str());
        Ok(VaultBatch {
            vaults: ledger.vaults().into_iter().filter(|v| scope.matches(v)).collect(),
            rejected: batch.rejected,
        })
    }
}

fn parse_rpc_response(backend: &Backend, text: &str) -> Result<Value, AdapterError> {
    let resp: RpcResponse =
        serde_json::from_str(text).map_err(|e| AdapterError::malformed(backend, e))?;
    if let Some(err) = resp.error {
        return Err(AdapterError::Rpc {
            backend: backend.clone(),
            code: err.code,
            message: err.message,
        });
    }
    resp.result
        .ok_or_else(|| AdapterError::malformed(backend, "response has neither result nor error"))
}

fn balance_of_calldata(holder: &str) -> Result<String, String> {
    let digits = holder.strip_prefix("0x").unwrap_or(holder);
    if digits.len() != 40 || hex::decode(digits).is_err() {
        return Err(format!("invalid holder address {holder}"));
    }
    Ok(format!(
        "0x{BALANCE_OF_SELECTOR}{:0>64}",
        digits.to_ascii_lowercase()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Backend {
        Backend::live_log("http://127.0.0.1:8545")
    }

    #[test]
    fn rpc_result_and_error() {
        let v = parse_rpc_response(&backend(), r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#).unwrap();
        assert_eq!(v, json!("0x10"));

        let err = parse_rpc_response(
            &backend(),
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"limit exceeded"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, AdapterError::Rpc { code: -32005, .. }));
        assert!(err.is_retryable());

        let err = parse_rpc_response(&backend(), "not json").unwrap_err();
        assert!(matches!(err, AdapterError::Malformed { .. }));
        assert_eq!(err.backend().kind, "live-log");
    }

    #[test]
    fn balance_of_pads_holder() {
        let data = balance_of_calldata("0x00000000000000000000000000000000000000AB").unwrap();
        assert_eq!(data.len(), 2 + 8 + 64);
        assert!(data.starts_with("0x70a08231000000000000000000000000"));
        assert!(data.ends_with("ab"));
        assert!(balance_of_calldata("0x1234").is_err());
    }

    #[tokio::test]
    async fn offline_without_cache_fails_fast() {
        let adapter = LiveLogAdapter::new(
            Url::parse("http://127.0.0.1:8545").unwrap(),
            LiveLogConfig::default(),
            TransportConfig {
                offline: true,
                ..Default::default()
            },
            None,
        )
        .unwrap();
        let err = adapter.precheck().await.unwrap_err();
        assert!(matches!(err, AdapterError::OfflineMiss { .. }));
        assert!(!err.is_retryable());
    }
}
