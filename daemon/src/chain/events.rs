//! Custody contract log definitions and decoding.

use alloy_primitives::B256;
use alloy_sol_types::{sol, SolEvent};

use crate::core::error::BrokerError;

sol! {
    #[derive(Debug)]
    /// A channel was funded and opened on chain.
    event Created(
        bytes32 indexed channelId,
        address indexed wallet,
        address[] participants,
        address adjudicator,
        uint64 challenge,
        uint64 nonce,
        address token,
        uint256[] allocations
    );

    #[derive(Debug)]
    /// The counterparty joined the channel.
    event Joined(bytes32 indexed channelId, uint256 index);

    #[derive(Debug)]
    /// Channel funding changed; deltas per participant in base units.
    event Resized(bytes32 indexed channelId, int256[] deltas);

    #[derive(Debug)]
    /// Someone submitted a (possibly stale) state for adjudication.
    event Challenged(bytes32 indexed channelId, uint256 version);

    #[derive(Debug)]
    /// Channel finalized with its last allocations.
    event Closed(bytes32 indexed channelId, uint256[] finalAllocations);
}

#[derive(Debug, Clone)]
pub enum CustodyEvent {
    Created(Created),
    Joined(Joined),
    Resized(Resized),
    Challenged(Challenged),
    Closed(Closed),
}

impl CustodyEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created(_) => "Created",
            Self::Joined(_) => "Joined",
            Self::Resized(_) => "Resized",
            Self::Challenged(_) => "Challenged",
            Self::Closed(_) => "Closed",
        }
    }
}

/// Decode a raw log into a custody event. Unknown topics yield `None` so
/// unrelated logs on the custody address are skipped silently.
pub fn parse_event(topics: &[B256], data: &[u8]) -> Result<Option<CustodyEvent>, BrokerError> {
    let Some(topic0) = topics.first() else {
        return Ok(None);
    };
    let decode_err =
        |e: alloy_sol_types::Error| BrokerError::ChainClient(format!("undecodable log: {}", e));

    let event = if *topic0 == Created::SIGNATURE_HASH {
        CustodyEvent::Created(
            Created::decode_raw_log(topics.iter().copied(), data, true).map_err(decode_err)?,
        )
    } else if *topic0 == Joined::SIGNATURE_HASH {
        CustodyEvent::Joined(
            Joined::decode_raw_log(topics.iter().copied(), data, true).map_err(decode_err)?,
        )
    } else if *topic0 == Resized::SIGNATURE_HASH {
        CustodyEvent::Resized(
            Resized::decode_raw_log(topics.iter().copied(), data, true).map_err(decode_err)?,
        )
    } else if *topic0 == Challenged::SIGNATURE_HASH {
        CustodyEvent::Challenged(
            Challenged::decode_raw_log(topics.iter().copied(), data, true).map_err(decode_err)?,
        )
    } else if *topic0 == Closed::SIGNATURE_HASH {
        CustodyEvent::Closed(
            Closed::decode_raw_log(topics.iter().copied(), data, true).map_err(decode_err)?,
        )
    } else {
        return Ok(None);
    };
    Ok(Some(event))
}
