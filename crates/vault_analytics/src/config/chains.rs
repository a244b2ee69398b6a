//! Supported chains, their endpoints and contract addresses.
//!
//! Built-in defaults can be overridden per chain from a JSON file. Load from:
//! env `VAULT_ANALYTICS_CONFIG_PATH`, or `./config/vault_analytics.json`, or
//! `./vault_analytics.json`.

use super::protocol::ZERO_ADDRESS;
use crate::error::Error;
use crate::events::{normalize_address, Address};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;
use url::Url;

const SUBGRAPH_BASE: &str = "https://api.thegraph.com/subgraphs/name/btcnft/vault-analytics";
const ANVIL_RPC: &str = "http://127.0.0.1:8545";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    LiveLog,
    IndexedQuery,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub backend: BackendKind,
    pub vault_nft: Address,
    pub vested_token: Address,
    #[serde(default)]
    pub achievement_minter: Option<Address>,
    #[serde(default)]
    pub auction_controller: Option<Address>,
    /// Collateral denominations; the first is used when a mint does not name one.
    #[serde(default)]
    pub collateral_tokens: Vec<Address>,
    #[serde(default)]
    pub subgraph_url: Option<String>,
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub deployment_block: u64,
}

fn is_placeholder(addr: &str) -> bool {
    addr.trim().is_empty() || addr.eq_ignore_ascii_case(ZERO_ADDRESS)
}

impl ChainConfig {
    fn not_configured(&self, what: &str) -> Error {
        Error::NotConfigured {
            chain_id: self.chain_id,
            what: what.to_string(),
        }
    }

    pub fn vault_contract(&self) -> Result<&Address, Error> {
        if is_placeholder(&self.vault_nft) {
            return Err(self.not_configured("vault contract address"));
        }
        Ok(&self.vault_nft)
    }

    /// Contracts whose logs feed the indexer: vault plus optional satellites.
    pub fn log_addresses(&self) -> Result<Vec<Address>, Error> {
        let mut out = vec![self.vault_contract()?.clone()];
        for extra in [&self.achievement_minter, &self.auction_controller]
            .into_iter()
            .flatten()
        {
            if !is_placeholder(extra) {
                out.push(extra.clone());
            }
        }
        Ok(out)
    }

    pub fn default_collateral_token(&self) -> Address {
        self.collateral_tokens
            .first()
            .cloned()
            .unwrap_or_else(|| ZERO_ADDRESS.to_string())
    }

    pub fn subgraph_endpoint(&self) -> Result<Url, Error> {
        self.endpoint(self.subgraph_url.as_deref(), "subgraph url")
    }

    pub fn rpc_endpoint(&self) -> Result<Url, Error> {
        self.endpoint(self.rpc_url.as_deref(), "rpc url")
    }

    fn endpoint(&self, raw: Option<&str>, what: &str) -> Result<Url, Error> {
        let raw = raw
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| self.not_configured(what))?;
        Url::parse(raw).map_err(|e| self.not_configured(&format!("{what} ({e})")))
    }
}

/// Partial per-chain override read from the config file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChainOverride {
    #[serde(default)]
    pub backend: Option<BackendKind>,
    #[serde(default)]
    pub vault_nft: Option<String>,
    #[serde(default)]
    pub vested_token: Option<String>,
    #[serde(default)]
    pub achievement_minter: Option<String>,
    #[serde(default)]
    pub auction_controller: Option<String>,
    #[serde(default)]
    pub collateral_tokens: Option<Vec<String>>,
    #[serde(default)]
    pub subgraph_url: Option<String>,
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub deployment_block: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Keyed by decimal chain id.
    #[serde(default)]
    pub chains: BTreeMap<String, ChainOverride>,
}

#[derive(Clone, Debug)]
pub struct ChainRegistry {
    chains: BTreeMap<u64, ChainConfig>,
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ChainRegistry {
    pub fn builtin() -> Self {
        let hosted = |chain_id: u64, name: &str, suffix: &str| ChainConfig {
            chain_id,
            name: name.to_string(),
            backend: BackendKind::IndexedQuery,
            vault_nft: ZERO_ADDRESS.to_string(),
            vested_token: ZERO_ADDRESS.to_string(),
            achievement_minter: None,
            auction_controller: None,
            collateral_tokens: Vec::new(),
            subgraph_url: Some(format!("{SUBGRAPH_BASE}{suffix}")),
            rpc_url: None,
            deployment_block: 0,
        };
        let anvil = ChainConfig {
            chain_id: 31337,
            name: "anvil".to_string(),
            backend: BackendKind::LiveLog,
            vault_nft: "0x5fbdb2315678afecb367f032d93f642f64180aa3".to_string(),
            vested_token: "0xe7f1725e7734ce288f8367e1bb143e90bb3f0512".to_string(),
            achievement_minter: None,
            auction_controller: None,
            collateral_tokens: Vec::new(),
            subgraph_url: None,
            rpc_url: Some(ANVIL_RPC.to_string()),
            deployment_block: 0,
        };
        let chains = [
            hosted(1, "mainnet", ""),
            hosted(8453, "base", "-base"),
            hosted(11155111, "sepolia", "-sepolia"),
            hosted(84532, "base-sepolia", "-base-sepolia"),
            anvil,
        ]
        .into_iter()
        .map(|c| (c.chain_id, c))
        .collect();
        Self { chains }
    }

    pub fn get(&self, chain_id: u64) -> Result<&ChainConfig, Error> {
        self.chains
            .get(&chain_id)
            .ok_or(Error::UnsupportedChain(chain_id))
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.chains.keys().copied()
    }

    /// Merge overrides into known chains. Unknown ids and malformed addresses
    /// are skipped with a warning.
    pub fn apply(&mut self, file: &ConfigFile) {
        for (key, ov) in &file.chains {
            let Some(chain) = key
                .trim()
                .parse::<u64>()
                .ok()
                .and_then(|id| self.chains.get_mut(&id))
            else {
                warn!(chain = %key, "override for unsupported chain ignored");
                continue;
            };
            if let Some(b) = ov.backend {
                chain.backend = b;
            }
            let addr = |field: &str, raw: &str| match normalize_address(field, raw) {
                Ok(a) => Some(a),
                Err(e) => {
                    warn!(error = %e, "ignoring override");
                    None
                }
            };
            if let Some(a) = ov.vault_nft.as_deref().and_then(|r| addr("vault_nft", r)) {
                chain.vault_nft = a;
            }
            if let Some(a) = ov
                .vested_token
                .as_deref()
                .and_then(|r| addr("vested_token", r))
            {
                chain.vested_token = a;
            }
            if let Some(a) = ov
                .achievement_minter
                .as_deref()
                .and_then(|r| addr("achievement_minter", r))
            {
                chain.achievement_minter = Some(a);
            }
            if let Some(a) = ov
                .auction_controller
                .as_deref()
                .and_then(|r| addr("auction_controller", r))
            {
                chain.auction_controller = Some(a);
            }
            if let Some(tokens) = &ov.collateral_tokens {
                chain.collateral_tokens = tokens
                    .iter()
                    .filter_map(|t| addr("collateral_tokens", t))
                    .collect();
            }
            if let Some(u) = &ov.subgraph_url {
                chain.subgraph_url = Some(u.clone());
            }
            if let Some(u) = &ov.rpc_url {
                chain.rpc_url = Some(u.clone());
            }
            if let Some(b) = ov.deployment_block {
                chain.deployment_block = b;
            }
        }
    }

    /// Built-in chains with overrides from `path`. Falls back to built-ins on error.
    pub fn load_from_path(path: &Path) -> Self {
        let mut registry = Self::builtin();
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<ConfigFile>(&s).map_err(|e| e.to_string()));
        match parsed {
            Ok(file) => registry.apply(&file),
            Err(error) => warn!(path = %path.display(), %error, "config not loaded"),
        }
        registry
    }

    /// Load: env VAULT_ANALYTICS_CONFIG_PATH, then ./config/vault_analytics.json, then ./vault_analytics.json.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("VAULT_ANALYTICS_CONFIG_PATH") {
            let p = Path::new(&path);
            if p.exists() {
                return Self::load_from_path(p);
            }
        }
        for candidate in [
            Path::new("./config/vault_analytics.json"),
            Path::new("./vault_analytics.json"),
        ] {
            if candidate.exists() {
                return Self::load_from_path(candidate);
            }
        }
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn unknown_chain_is_unsupported() {
        let reg = ChainRegistry::builtin();
        assert!(matches!(reg.get(5), Err(Error::UnsupportedChain(5))));
        assert_eq!(reg.chain_ids().count(), 5);
    }

    #[test]
    fn placeholder_contracts_are_not_configured() {
        let reg = ChainRegistry::builtin();
        let mainnet = reg.get(1).unwrap();
        assert!(matches!(
            mainnet.vault_contract(),
            Err(Error::NotConfigured { chain_id: 1, .. })
        ));
        assert!(mainnet.subgraph_endpoint().is_ok());
        assert!(mainnet.rpc_endpoint().is_err());
        let anvil = reg.get(31337).unwrap();
        assert_eq!(anvil.backend, BackendKind::LiveLog);
        assert!(anvil.vault_contract().is_ok());
        assert!(anvil.subgraph_endpoint().is_err());
    }

    #[test]
    fn overrides_merge_into_builtin() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"{{"chains":{{"8453":{{"vault_nft":"0x00000000000000000000000000000000000000AA",
                "collateral_tokens":["0x00000000000000000000000000000000000000bb"],
                "rpc_url":"https://base.example"}},
               "999":{{"rpc_url":"http://nowhere"}}}}}}"#
        )
        .unwrap();
        let reg = ChainRegistry::load_from_path(tmp.path());
        let base = reg.get(8453).unwrap();
        assert_eq!(
            base.vault_nft,
            "0x00000000000000000000000000000000000000aa"
        );
        assert_eq!(
            base.default_collateral_token(),
            "0x00000000000000000000000000000000000000bb"
        );
        assert!(base.rpc_endpoint().is_ok());
        assert!(reg.get(999).is_err());
    }

    #[test]
    fn missing_file_yields_builtin() {
        let reg = ChainRegistry::load_from_path(Path::new("/definitely/not/here.json"));
        assert!(reg.get(31337).is_ok());
    }
}
