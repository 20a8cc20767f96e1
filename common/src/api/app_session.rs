use alloy_primitives::Address;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::time::TimestampMillis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppSessionStatus {
    Open,
    Closed,
}

impl AppSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Immutable definition of a multi-party session: who participates, how
/// much weight each signature carries, and the weighted quorum state
/// transitions must meet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppDefinition {
    #[serde(default)]
    pub protocol: Option<String>,
    pub participants: Vec<Address>,
    pub weights: Vec<u64>,
    pub quorum: u64,
    #[serde(default)]
    pub challenge: Option<u64>,
    pub nonce: u64,
}

/// A participant's share of one asset inside the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppAllocation {
    pub participant: Address,
    pub asset: String,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppSessionParams {
    pub definition: AppDefinition,
    pub allocations: Vec<AppAllocation>,
    #[serde(default)]
    pub session_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAppStateParams {
    pub app_session_id: String,
    pub version: u64,
    pub allocations: Vec<AppAllocation>,
    #[serde(default)]
    pub session_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseAppSessionParams {
    pub app_session_id: String,
    pub allocations: Vec<AppAllocation>,
    #[serde(default)]
    pub session_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSessionView {
    pub app_session_id: String,
    pub status: AppSessionStatus,
    pub participants: Vec<Address>,
    pub weights: Vec<u64>,
    pub quorum: u64,
    pub version: u64,
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_data: Option<String>,
    pub created_at: TimestampMillis,
    pub updated_at: TimestampMillis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAppSessionsParams {
    pub participant: Option<Address>,
    pub status: Option<AppSessionStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAppSessionsResult {
    pub app_sessions: Vec<AppSessionView>,
}
