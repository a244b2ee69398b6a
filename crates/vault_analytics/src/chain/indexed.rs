//! GraphQL client for the hosted indexing service.

use super::cache::Cache;
use super::error::{AdapterError, Backend};
use super::transport::{HttpTransport, TransportConfig};
use super::{EventBatch, EventFilter, RejectedRecord, VaultBatch};
use crate::analytics::ScopeFilter;
use crate::events::{normalize_vault, RawEvent, RawVault};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_PAGE_SIZE: usize = 1000;

const VAULTS_QUERY: &str = r#"
query Vaults($first: Int!, $skip: Int!, $where: Vault_filter) {
  rows: vaults(first: $first, skip: $skip, orderBy: id, orderDirection: asc, where: $where) {
    id
    owner
    treasureContract
    treasureTokenId
    collateralToken
    collateralAmount
    mintTimestamp
    lastWithdrawal
    vestedBTCAmount
    lastActivity
    pokeTimestamp
    windowId
    issuer
  }
}"#;

const EVENTS_QUERY: &str = r#"
query VaultEvents($first: Int!, $skip: Int!, $where: VaultEvent_filter) {
  rows: vaultEvents(first: $first, skip: $skip, orderBy: blockNumber, orderDirection: asc, where: $where) {
    type
    blockNumber
    blockTimestamp
    transactionHash
    logIndex
    params
  }
}"#;

const META_QUERY: &str = "query Meta { _meta { block { number } } }";

#[derive(Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

/// Event row: envelope fields plus the event arguments as a JSON object
/// (or a JSON-encoded string of one).
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventRow {
    #[serde(rename = "type")]
    kind: String,
    block_number: Value,
    block_timestamp: Value,
    transaction_hash: Value,
    log_index: Value,
    #[serde(default)]
    params: Value,
}

pub struct IndexedQueryAdapter {
    transport: HttpTransport,
    page_size: usize,
}

impl IndexedQueryAdapter {
    pub fn new(
        endpoint: Url,
        transport: TransportConfig,
        cache: Option<Arc<Cache>>,
    ) -> Result<Self, AdapterError> {
        let backend = Backend::indexed_query(&endpoint);
        Ok(Self {
            transport: HttpTransport::new(backend, endpoint, transport, cache)?,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn backend(&self) -> &Backend {
        self.transport.backend()
    }

    async fn query(&self, query: &str, variables: Value) -> Result<Value, AdapterError> {
        let body = json!({ "query": query, "variables": variables });
        let text = self.transport.post_json(&body, false).await?;
        parse_graphql_response(self.backend(), &text)
    }

    /// Fetch every row of a paginated query. Stops on the first short page.
    async fn paginate(&self, query: &str, filter: Value) -> Result<Vec<Value>, AdapterError> {
        let mut rows = Vec::new();
        let mut skip = 0usize;
        loop {
            let data = self
                .query(
                    query,
                    json!({ "first": self.page_size, "skip": skip, "where": filter }),
                )
                .await?;
            let page = match data.get("rows") {
                Some(Value::Array(page)) => page.clone(),
                _ => return Err(AdapterError::malformed(self.backend(), "missing rows array")),
            };
            let n = page.len();
            debug!(skip, rows = n, "fetched page");
            rows.extend(page);
            if is_last_page(n, self.page_size) {
                break;
            }
            skip += n;
        }
        Ok(rows)
    }

    pub async fn head_block(&self) -> Result<u64, AdapterError> {
        let data = self.query(META_QUERY, json!({})).await?;
        data.pointer("/_meta/block/number")
            .and_then(Value::as_u64)
            .ok_or_else(|| AdapterError::malformed(self.backend(), "missing _meta.block.number"))
    }

    pub async fn fetch_vaults(&self, scope: &ScopeFilter) -> Result<VaultBatch, AdapterError> {
        let rows = self.paginate(VAULTS_QUERY, vault_where(scope)).await?;
        let mut batch = VaultBatch::default();
        for row in rows {
            let raw: RawVault = serde_json::from_value(row.clone())
                .map_err(|e| AdapterError::malformed(self.backend(), e))?;
            match normalize_vault(&raw) {
                Ok(vault) if scope.matches(&vault) => batch.vaults.push(vault),
                Ok(_) => {}
                Err(error) => batch.rejected.push(RejectedRecord { error, raw: row }),
            }
        }
        info!(vaults = batch.vaults.len(), rejected = batch.rejected.len(), "fetched vaults");
        Ok(batch)
    }

    pub async fn fetch_events(&self, filter: &EventFilter) -> Result<EventBatch, AdapterError> {
        let rows = self.paginate(EVENTS_QUERY, event_where(filter)).await?;
        let mut raws = Vec::with_capacity(rows.len());
        for row in rows {
            let row: EventRow = serde_json::from_value(row)
                .map_err(|e| AdapterError::malformed(self.backend(), e))?;
            raws.push(
                raw_from_row(row).map_err(|e| AdapterError::malformed(self.backend(), e))?,
            );
        }
        let batch = EventBatch::from_raw(raws, filter);
        info!(
            from = filter.from_block,
            events = batch.events.len(),
            rejected = batch.rejected.len(),
            "fetched events"
        );
        Ok(batch)
    }
}

fn parse_graphql_response(backend: &Backend, text: &str) -> Result<Value, AdapterError> {
    let resp: GraphQlResponse =
        serde_json::from_str(text).map_err(|e| AdapterError::malformed(backend, e))?;
    if !resp.errors.is_empty() {
        let message = resp
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(AdapterError::Query {
            backend: backend.clone(),
            message,
        });
    }
    resp.data
        .filter(|d| !d.is_null())
        .ok_or_else(|| AdapterError::malformed(backend, "response has no data"))
}

fn is_last_page(rows: usize, page_size: usize) -> bool {
    rows < page_size
}

fn vault_where(scope: &ScopeFilter) -> Value {
    match scope {
        ScopeFilter::All => json!({}),
        ScopeFilter::Issuer(addr) => json!({ "issuer": addr.to_ascii_lowercase() }),
        ScopeFilter::Treasure(addr) => json!({ "treasureContract": addr.to_ascii_lowercase() }),
    }
}

fn event_where(filter: &EventFilter) -> Value {
    let mut w = Map::new();
    w.insert("blockNumber_gte".into(), json!(filter.from_block.to_string()));
    if let Some(to) = filter.to_block {
        w.insert("blockNumber_lte".into(), json!(to.to_string()));
    }
    if !filter.types.is_empty() {
        let types: Vec<&str> = filter.types.iter().map(|t| t.as_str()).collect();
        w.insert("type_in".into(), json!(types));
    }
    Value::Object(w)
}

fn raw_from_row(row: EventRow) -> Result<RawEvent, String> {
    let params = match row.params {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        Value::String(s) => match serde_json::from_str(&s) {
            Ok(Value::Object(map)) => map,
            _ => return Err(format!("params of {} is not a JSON object", row.kind)),
        },
        other => return Err(format!("params of {} is {other}", row.kind)),
    };
    let mut raw = RawEvent::new(&row.kind);
    raw.fields = params;
    Ok(raw
        .with("blockNumber", row.block_number)
        .with("blockTimestamp", row.block_timestamp)
        .with("transactionHash", row.transaction_hash)
        .with("logIndex", row.log_index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{normalize, EventKind, EventType};

    fn backend() -> Backend {
        Backend::indexed_query("https://example.invalid/subgraph")
    }

    #[test]
    fn graphql_errors_become_query_errors() {
        let err = parse_graphql_response(
            &backend(),
            r#"{"errors":[{"message":"bad field"},{"message":"second"}]}"#,
        )
        .unwrap_err();
        match err {
            AdapterError::Query { message, backend } => {
                assert_eq!(message, "bad field; second");
                assert_eq!(backend.kind, "indexed-query");
            }
            other => panic!("unexpected {other:?}"),
        }
        let err = parse_graphql_response(&backend(), r#"{"data":null}"#).unwrap_err();
        assert!(matches!(err, AdapterError::Malformed { .. }));
        let data = parse_graphql_response(&backend(), r#"{"data":{"rows":[]}}"#).unwrap();
        assert_eq!(data, json!({"rows": []}));
    }

    #[test]
    fn pagination_stops_on_short_page() {
        assert!(!is_last_page(1000, 1000));
        assert!(is_last_page(999, 1000));
        assert!(is_last_page(0, 1000));
    }

    #[test]
    fn scope_pushdown_lowercases() {
        let issuer = ScopeFilter::Issuer("0xABCDEF0000000000000000000000000000000001".into());
        assert_eq!(
            vault_where(&issuer),
            json!({"issuer": "0xabcdef0000000000000000000000000000000001"})
        );
        assert_eq!(vault_where(&ScopeFilter::All), json!({}));
    }

    #[test]
    fn event_where_includes_range_and_types() {
        let f = EventFilter::range(10, Some(20)).with_types(&[EventType::Withdrawn]);
        assert_eq!(
            event_where(&f),
            json!({"blockNumber_gte": "10", "blockNumber_lte": "20", "type_in": ["Withdrawn"]})
        );
    }

    #[test]
    fn event_row_with_string_params_normalizes() {
        let row: EventRow = serde_json::from_value(json!({
            "type": "MatchClaimed",
            "blockNumber": "7",
            "blockTimestamp": "1700000000",
            "transactionHash": format!("0x{}", "aa".repeat(32)),
            "logIndex": "2",
            "params": "{\"tokenId\":\"5\",\"amount\":\"100\"}"
        }))
        .unwrap();
        let ev = normalize(&raw_from_row(row).unwrap()).unwrap();
        assert_eq!(ev.meta.block_number, 7);
        assert_eq!(ev.kind, EventKind::MatchClaimed { token_id: 5, amount: 100 });
    }
}
