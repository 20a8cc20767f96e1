use std::{collections::HashMap, fs, path::Path};

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::error::BrokerError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Channel parameters the broker agrees to co-sign.
pub const MIN_CHANNEL_CHALLENGE_SECS: u64 = 3600;

// Auth limits
pub const MAX_LIVE_CHALLENGES: usize = 1000;
pub const CHALLENGE_TTL_SECS: u64 = 300;
pub const SESSION_TTL_SECS: u64 = 86_400;
pub const AUTH_CLEANUP_INTERVAL_SECS: u64 = 600;

// Blockchain action worker
pub const ACTION_WORKER_TICK_SECS: u64 = 30;
pub const ACTION_BATCH_SIZE: usize = 20;
pub const MAX_ACTION_RETRIES: u32 = 5;

// WebSocket connection tuning
pub const OUTBOUND_QUEUE_SIZE: usize = 256;
pub const WS_WRITE_TIMEOUT_SECS: u64 = 5;

// Replay protection window for signed requests
pub const REQUEST_CACHE_TTL_SECS: u64 = 60;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8000";
pub const DEFAULT_EVENT_POLL_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_block_step() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    DEFAULT_EVENT_POLL_INTERVAL_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub id: u64,
    pub name: String,
    pub rpc_url: String,
    pub custody_address: Address,
    pub adjudicator_address: Address,
    #[serde(default)]
    pub balance_checker_address: Option<Address>,
    #[serde(default = "default_block_step")]
    pub block_step: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Endpoint of the custody submitter that lands signed checkpoints on
    /// chain for us. The EVM transaction pipeline lives behind it.
    #[serde(default)]
    pub submitter_url: Option<String>,
    /// First block to scan when no event has been processed yet.
    #[serde(default)]
    pub start_block: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub blockchain_id: u64,
    pub address: Address,
    pub decimals: u8,
    /// Inherits the asset symbol when blank.
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub disabled: bool,
    pub tokens: Vec<TokenConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub db_path: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// 0x-prefixed secp256k1 private key of the broker.
    pub broker_private_key: String,
    /// PEM files for the ES256 JWT keypair.
    pub jwt_private_key_path: String,
    pub jwt_public_key_path: String,
    pub chains: Vec<ChainConfig>,
    pub assets: Vec<AssetConfig>,
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

impl NodeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let mut config: NodeConfig = serde_json::from_str(&raw)?;
        config.normalize()?;
        Ok(config)
    }

    /// Apply symbol inheritance and reject inconsistent entries.
    pub fn normalize(&mut self) -> Result<(), ConfigError> {
        let mut chain_ids = std::collections::HashSet::new();
        for chain in &self.chains {
            if !chain_ids.insert(chain.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate chain id {}",
                    chain.id
                )));
            }
            if chain.block_step == 0 {
                return Err(ConfigError::Invalid(format!(
                    "chain {} has block_step 0",
                    chain.id
                )));
            }
        }

        for asset in &mut self.assets {
            if asset.symbol.trim().is_empty() {
                return Err(ConfigError::Invalid("asset with empty symbol".to_string()));
            }
            for token in &mut asset.tokens {
                if token
                    .symbol
                    .as_deref()
                    .map(|s| s.trim().is_empty())
                    .unwrap_or(true)
                {
                    token.symbol = Some(asset.symbol.clone());
                }
                if !chain_ids.contains(&token.blockchain_id) {
                    return Err(ConfigError::Invalid(format!(
                        "token {} of asset {} references unknown chain {}",
                        token.address, asset.symbol, token.blockchain_id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.id == chain_id)
    }
}

/// Resolved asset lookup tables built from the config once at startup.
#[derive(Debug, Clone, Default)]
pub struct AssetRegistry {
    assets: Vec<AssetConfig>,
    // (chain_id, token_address) -> (asset_symbol, decimals)
    by_token: HashMap<(u64, Address), (String, u8)>,
    // (asset_symbol, chain_id) -> token
    by_symbol: HashMap<(String, u64), TokenConfig>,
}

impl AssetRegistry {
    pub fn new(assets: Vec<AssetConfig>) -> Self {
        let mut by_token = HashMap::new();
        let mut by_symbol = HashMap::new();
        for asset in assets.iter().filter(|a| !a.disabled) {
            for token in asset.tokens.iter().filter(|t| !t.disabled) {
                by_token.insert(
                    (token.blockchain_id, token.address),
                    (asset.symbol.clone(), token.decimals),
                );
                by_symbol.insert((asset.symbol.clone(), token.blockchain_id), token.clone());
            }
        }
        Self {
            assets,
            by_token,
            by_symbol,
        }
    }

    pub fn all(&self) -> &[AssetConfig] {
        &self.assets
    }

    /// Asset symbol and decimals for an on-chain token.
    pub fn by_token(&self, chain_id: u64, token: Address) -> Option<(&str, u8)> {
        self.by_token
            .get(&(chain_id, token))
            .map(|(symbol, decimals)| (symbol.as_str(), *decimals))
    }

    pub fn token(&self, symbol: &str, chain_id: u64) -> Option<&TokenConfig> {
        self.by_symbol.get(&(symbol.to_string(), chain_id))
    }

    pub fn supports(&self, symbol: &str) -> bool {
        self.by_symbol.keys().any(|(s, _)| s == symbol)
    }

    pub fn decimals(&self, symbol: &str, chain_id: u64) -> Result<u8, BrokerError> {
        self.token(symbol, chain_id)
            .map(|t| t.decimals)
            .ok_or_else(|| BrokerError::UnknownAsset(symbol.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample() -> NodeConfig {
        NodeConfig {
            db_path: ":memory:".into(),
            bind_address: default_bind_address(),
            broker_private_key: "0x01".into(),
            jwt_private_key_path: "jwt.pem".into(),
            jwt_public_key_path: "jwt.pub.pem".into(),
            chains: vec![ChainConfig {
                id: 137,
                name: "polygon".into(),
                rpc_url: "http://localhost:8545".into(),
                custody_address: Address::repeat_byte(0x01),
                adjudicator_address: Address::repeat_byte(0x02),
                balance_checker_address: None,
                block_step: 1000,
                poll_interval_secs: 5,
                submitter_url: None,
                start_block: 0,
            }],
            assets: vec![AssetConfig {
                symbol: "usdc".into(),
                name: "USD Coin".into(),
                disabled: false,
                tokens: vec![TokenConfig {
                    blockchain_id: 137,
                    address: Address::from_str("0x2791bca1f2de4661ed88a30c99a7a9449aa84174")
                        .unwrap(),
                    decimals: 6,
                    symbol: None,
                    disabled: false,
                }],
            }],
        }
    }

    #[test]
    fn token_symbol_inherits_from_asset() {
        let mut config = sample();
        config.normalize().unwrap();
        assert_eq!(
            config.assets[0].tokens[0].symbol.as_deref(),
            Some("usdc")
        );
    }

    #[test]
    fn duplicate_chain_ids_are_rejected() {
        let mut config = sample();
        let dup = config.chains[0].clone();
        config.chains.push(dup);
        assert!(config.normalize().is_err());
    }

    #[test]
    fn registry_resolves_tokens_both_ways() {
        let mut config = sample();
        config.normalize().unwrap();
        let registry = AssetRegistry::new(config.assets);
        let token = registry.token("usdc", 137).unwrap();
        assert_eq!(token.decimals, 6);
        let (symbol, decimals) = registry.by_token(137, token.address).unwrap();
        assert_eq!(symbol, "usdc");
        assert_eq!(decimals, 6);
        assert!(registry.token("usdc", 1).is_none());
    }
}
