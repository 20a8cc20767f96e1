//! Persistent domain records of the clearing node.

use alloy_primitives::Address;
use bigdecimal::{num_bigint::BigInt, BigDecimal};
use serde::{Deserialize, Serialize};

use clearhouse_common::{
    account::{AccountId, AccountType},
    api::{
        auth::AuthAllowance,
        app_session::AppSessionStatus,
        channel::{ChannelStatus, StateIntent},
    },
    crypto::RpcSignature,
    time::{TimestampMillis, TimestampSeconds},
};

/// String serde for arbitrary-precision integers stored in JSON columns.
pub mod bigint_string {
    use bigdecimal::num_bigint::BigInt;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigInt, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<BigInt>()
            .map_err(|_| Error::custom(format!("invalid integer: {}", raw)))
    }
}

/// Hex serde for opaque byte payloads.
pub mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let stripped = raw.strip_prefix("0x").unwrap_or(&raw);
        hex::decode(stripped).map_err(Error::custom)
    }
}

/// A single journal row. Append-only, never mutated.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: u64,
    pub account_id: AccountId,
    pub account_type: AccountType,
    pub asset: String,
    pub wallet: AccountId,
    pub credit: BigDecimal,
    pub debit: BigDecimal,
    pub session_key: Option<Address>,
    pub created_at: TimestampMillis,
}

/// Semantic grouping of journal entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    AppDeposit,
    AppWithdrawal,
    EscrowLock,
    EscrowUnlock,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Transfer => "transfer",
            Self::AppDeposit => "app_deposit",
            Self::AppWithdrawal => "app_withdrawal",
            Self::EscrowLock => "escrow_lock",
            Self::EscrowUnlock => "escrow_unlock",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "deposit" => Some(Self::Deposit),
            "withdrawal" => Some(Self::Withdrawal),
            "transfer" => Some(Self::Transfer),
            "app_deposit" => Some(Self::AppDeposit),
            "app_withdrawal" => Some(Self::AppWithdrawal),
            "escrow_lock" => Some(Self::EscrowLock),
            "escrow_unlock" => Some(Self::EscrowUnlock),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerTransaction {
    pub id: u64,
    pub tx_type: TransactionType,
    pub from_account: AccountId,
    pub to_account: AccountId,
    pub asset: String,
    pub amount: BigDecimal,
    pub created_at: TimestampMillis,
}

/// One participant's share of channel funds in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub participant: Address,
    pub token_address: Address,
    #[serde(with = "bigint_string")]
    pub raw_amount: BigInt,
}

/// The off-chain state co-signed by wallet and broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsignedState {
    pub intent: StateIntent,
    pub version: u64,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    pub allocations: Vec<Allocation>,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub channel_id: String,
    pub chain_id: u64,
    pub token: Address,
    pub wallet: Address,
    pub participant_signer: Address,
    /// On-chain funded amount in base units.
    pub raw_amount: BigInt,
    pub status: ChannelStatus,
    pub challenge: u64,
    pub nonce: u64,
    pub adjudicator: Address,
    pub state: UnsignedState,
    pub server_sig: Option<RpcSignature>,
    pub user_sig: Option<RpcSignature>,
    pub created_at: TimestampMillis,
    pub updated_at: TimestampMillis,
}

#[derive(Debug, Clone)]
pub struct AppSession {
    pub session_id: String,
    pub participants: Vec<Address>,
    pub weights: Vec<u64>,
    pub quorum: u64,
    pub challenge: u64,
    pub nonce: u64,
    pub protocol: Option<String>,
    pub session_data: Option<String>,
    pub status: AppSessionStatus,
    pub version: u64,
    pub created_at: TimestampMillis,
    pub updated_at: TimestampMillis,
}

impl AppSession {
    /// Weight of a participant's signature, zero for strangers.
    pub fn weight_of(&self, signer: &Address) -> u64 {
        self.participants
            .iter()
            .position(|p| p == signer)
            .map(|i| self.weights.get(i).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Pending,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Durable outbound on-chain work.
#[derive(Debug, Clone)]
pub struct BlockchainAction {
    pub id: u64,
    pub action_type: String,
    pub channel_id: String,
    pub chain_id: u64,
    /// Serialized action payload (JSON).
    pub data: String,
    pub status: ActionStatus,
    pub retries: u32,
    pub error: Option<String>,
    pub tx_hash: Option<String>,
    pub created_at: TimestampMillis,
    pub updated_at: TimestampMillis,
}

pub const ACTION_TYPE_CHECKPOINT: &str = "checkpoint";

/// Payload of a checkpoint action: the broker's latest co-signed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    pub channel_id: String,
    pub state: UnsignedState,
    pub user_sig: RpcSignature,
    pub server_sig: RpcSignature,
}

/// Idempotency record: one row per applied custody log.
#[derive(Debug, Clone)]
pub struct ContractEvent {
    pub chain_id: u64,
    pub contract_address: Address,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
}

/// Delegated signing credential with spending caps.
#[derive(Debug, Clone)]
pub struct SessionKey {
    pub address: Address,
    pub wallet: Address,
    pub application: String,
    pub scope: String,
    pub allowances: Vec<AuthAllowance>,
    pub expires_at: TimestampSeconds,
    pub created_at: TimestampMillis,
}

impl SessionKey {
    pub fn is_active(&self, now: TimestampSeconds) -> bool {
        self.expires_at > now
    }

    pub fn allowance_for(&self, asset: &str) -> Option<&BigDecimal> {
        self.allowances
            .iter()
            .find(|a| a.asset == asset)
            .map(|a| &a.amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_json_round_trip() {
        let state = UnsignedState {
            intent: StateIntent::Resize,
            version: 3,
            data: vec![0xde, 0xad],
            allocations: vec![Allocation {
                participant: Address::repeat_byte(0x01),
                token_address: Address::repeat_byte(0x02),
                raw_amount: BigInt::from(1_000_000u64),
            }],
        };
        let raw = serde_json::to_string(&state).unwrap();
        assert!(raw.contains("\"0xdead\""));
        assert!(raw.contains("\"1000000\""));
        let back: UnsignedState = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn weight_lookup() {
        let session = AppSession {
            session_id: "s".into(),
            participants: vec![Address::repeat_byte(1), Address::repeat_byte(2)],
            weights: vec![70, 30],
            quorum: 100,
            challenge: 0,
            nonce: 1,
            protocol: None,
            session_data: None,
            status: AppSessionStatus::Open,
            version: 1,
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(session.weight_of(&Address::repeat_byte(1)), 70);
        assert_eq!(session.weight_of(&Address::repeat_byte(9)), 0);
    }
}
