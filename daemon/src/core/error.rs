use anyhow::Error as AnyError;
use clearhouse_common::{crypto::CryptoError, rpc::RpcError, units::UnitsError};
use thiserror::Error;

/// Domain and infrastructure errors of the clearing node.
///
/// Client-safe variants surface verbatim in RPC error responses; the rest
/// are masked behind a generic message by the dispatcher.
#[derive(Debug, Error)]
pub enum BrokerError {
    // -- client-safe domain errors -------------------------------------
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("unsupported asset: {0}")]
    UnknownAsset(String),
    #[error("unsupported chain: {0}")]
    UnknownChain(u64),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("channel not open: {0}")]
    ChannelNotOpen(String),
    #[error("resize already ongoing")]
    ResizeAlreadyOngoing,
    #[error("wallet has a challenged channel")]
    ChallengedChannelExists,
    #[error("an open channel already exists for this token")]
    ChannelAlreadyExists,
    #[error("app session not found: {0}")]
    AppSessionNotFound(String),
    #[error("app session not open: {0}")]
    AppSessionNotOpen(String),
    #[error("version must be greater than {0}")]
    StaleVersion(u64),
    #[error("insufficient quorum")]
    QuorumNotMet,
    #[error("allocation mismatch: {0}")]
    AllocationMismatch(String),
    #[error("insufficient session key allowance")]
    InsufficientAllowance,
    #[error("asset {0} not allowed in session key spending cap")]
    AssetNotAllowed(String),
    #[error("challenge not found")]
    ChallengeNotFound,
    #[error("challenge expired")]
    ChallengeExpired,
    #[error("too many pending challenges")]
    TooManyChallenges,
    #[error("session key not found")]
    SessionKeyNotFound,
    #[error("destination not found")]
    DestinationNotFound,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Units(#[from] UnitsError),

    // -- infrastructure ------------------------------------------------
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("chain client error: {0}")]
    ChainClient(String),
    /// Undecodable durable data. Actions failing with this are poisoned
    /// and must not be retried.
    #[error("unmarshal checkpoint data: {0}")]
    CorruptActionData(String),
    #[error(transparent)]
    Crypto(CryptoError),
    #[error(transparent)]
    Any(#[from] AnyError),
}

impl BrokerError {
    pub fn is_client_safe(&self) -> bool {
        !matches!(
            self,
            Self::Storage(_)
                | Self::Serde(_)
                | Self::ChainClient(_)
                | Self::CorruptActionData(_)
                | Self::Any(_)
        )
    }
}

impl From<CryptoError> for BrokerError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidEncoding | CryptoError::RecoveryFailed => Self::InvalidSignature,
            other => Self::Crypto(other),
        }
    }
}

impl From<BrokerError> for RpcError {
    fn from(e: BrokerError) -> Self {
        if e.is_client_safe() {
            RpcError::Client(format!("{:#}", e))
        } else {
            RpcError::Internal(e.into())
        }
    }
}
