use alloy_primitives::Address;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::time::TimestampMillis;

/// Channel lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Open,
    Closed,
    Resizing,
    Challenged,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Resizing => "resizing",
            Self::Challenged => "challenged",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            "resizing" => Some(Self::Resizing),
            "challenged" => Some(Self::Challenged),
            _ => None,
        }
    }
}

/// How the custody contract interprets a signed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateIntent {
    Initialize,
    Operate,
    Resize,
    Finalize,
}

impl StateIntent {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Initialize => 0,
            Self::Operate => 1,
            Self::Resize => 2,
            Self::Finalize => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Initialize),
            1 => Some(Self::Operate),
            2 => Some(Self::Resize),
            3 => Some(Self::Finalize),
            _ => None,
        }
    }
}

/// One participant's share of channel funds, in raw base units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateAllocation {
    pub participant: Address,
    pub token_address: Address,
    /// Decimal string of base units.
    pub raw_amount: BigDecimal,
}

/// The off-chain channel state both parties sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsignedStateView {
    pub intent: StateIntent,
    pub version: u64,
    /// 0x-prefixed hex of the opaque state data.
    pub data: String,
    pub allocations: Vec<StateAllocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelView {
    pub channel_id: String,
    pub chain_id: u64,
    pub token: Address,
    pub wallet: Address,
    pub status: ChannelStatus,
    /// On-chain funded amount in base units.
    pub raw_amount: BigDecimal,
    pub version: u64,
    pub created_at: TimestampMillis,
    pub updated_at: TimestampMillis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChannelParams {
    pub chain_id: u64,
    pub token: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeChannelParams {
    pub channel_id: String,
    /// Shift between unified balance and channel backing, in base units.
    pub allocate_amount: Option<BigDecimal>,
    /// Net on-chain deposit (positive) or withdrawal (negative), base units.
    pub resize_amount: Option<BigDecimal>,
    pub funds_destination: Option<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseChannelParams {
    pub channel_id: String,
    pub funds_destination: Option<Address>,
}

/// Response shared by create/resize/close: the broker-signed state the
/// client countersigns and submits on chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelOperationResult {
    pub channel_id: String,
    pub state: UnsignedStateView,
    pub state_signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetChannelsParams {
    pub wallet: Option<Address>,
    pub status: Option<ChannelStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetChannelsResult {
    pub channels: Vec<ChannelView>,
}
