pub mod app_session;
pub mod auth;
pub mod channel;
pub mod ledger;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Method names for server-initiated notifications.
pub const NOTIFY_BALANCE_UPDATE: &str = "balance_update";
pub const NOTIFY_CHANNEL_UPDATE: &str = "channel_update";
pub const NOTIFY_APP_SESSION_UPDATE: &str = "app_session_update";
pub const NOTIFY_TRANSFER: &str = "transfer";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub chain_id: u64,
    pub name: String,
    pub custody_address: Address,
    pub adjudicator_address: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetConfigResult {
    pub broker_address: Address,
    pub networks: Vec<NetworkInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub chain_id: u64,
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetInfo {
    pub symbol: String,
    pub name: String,
    pub tokens: Vec<TokenInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAssetsResult {
    pub assets: Vec<AssetInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUserTagParams {
    pub wallet: Option<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUserTagResult {
    pub tag: String,
}
