use alloy_primitives::Address;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::{
    crypto::RpcSignature,
    time::{TimestampMillis, TimestampSeconds},
};

/// Per-asset spending cap a wallet grants to a session key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthAllowance {
    pub asset: String,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequestParams {
    pub address: Address,
    pub session_key: Address,
    /// Application name; becomes the EIP-712 domain of the signed policy.
    #[serde(default)]
    pub application: Option<String>,
    #[serde(default)]
    pub allowances: Vec<AuthAllowance>,
    /// Requested session key expiry (unix seconds).
    #[serde(default)]
    pub expires_at: Option<TimestampSeconds>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthChallengeResult {
    /// UUID the wallet embeds in the policy it signs.
    pub challenge_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthVerifyParams {
    pub challenge: String,
    pub signature: RpcSignature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthVerifyResult {
    pub address: Address,
    pub session_key: Address,
    pub jwt_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthJwtVerifyParams {
    pub jwt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthJwtVerifyResult {
    pub address: Address,
    pub session_key: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionKeyView {
    pub address: Address,
    pub application: String,
    pub scope: String,
    pub allowances: Vec<AuthAllowance>,
    pub expires_at: TimestampSeconds,
    pub created_at: TimestampMillis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSessionKeysResult {
    pub session_keys: Vec<SessionKeyView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeSessionKeyParams {
    pub session_key: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeSessionKeyResult {
    pub session_key: Address,
    pub revoked: bool,
}
