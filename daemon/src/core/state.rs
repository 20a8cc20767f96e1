//! Channel state packing, hashing and signing.
//!
//! The custody contract identifies a channel by the keccak256 of its
//! ABI-packed creation parameters, and accepts states signed over the
//! keccak256 of the ABI-encoded `(channel_id, intent, version, data,
//! allocations)` tuple. Both derivations must be bit-exact with the
//! contract, so everything here goes through alloy's ABI encoder.

use alloy_primitives::{keccak256, Address, Bytes, B256, I256, U256};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::SolValue;
use bigdecimal::num_bigint::BigInt;
use std::str::FromStr;

use clearhouse_common::crypto::{sign_payload_hash, RpcSignature};

use super::{error::BrokerError, model::UnsignedState};

/// Deterministic channel id from creation parameters.
pub fn derive_channel_id(
    participants: &[Address],
    adjudicator: Address,
    challenge: u64,
    nonce: u64,
    chain_id: u64,
) -> B256 {
    let packed = (
        participants.to_vec(),
        adjudicator,
        challenge,
        nonce,
        chain_id,
    )
        .abi_encode_packed();
    keccak256(&packed)
}

pub fn channel_id_hex(id: B256) -> String {
    format!("{:#x}", id)
}

pub fn parse_channel_id(raw: &str) -> Result<B256, BrokerError> {
    B256::from_str(raw).map_err(|_| BrokerError::ChannelNotFound(raw.to_string()))
}

/// Convert a non-negative big integer into a uint256.
pub fn bigint_to_u256(value: &BigInt) -> Result<U256, BrokerError> {
    if value.sign() == bigdecimal::num_bigint::Sign::Minus {
        return Err(BrokerError::InvalidAmount(value.to_string()));
    }
    U256::from_str_radix(&value.to_str_radix(10), 10)
        .map_err(|_| BrokerError::InvalidAmount(value.to_string()))
}

pub fn bigint_to_i256(value: &BigInt) -> Result<I256, BrokerError> {
    I256::from_dec_str(&value.to_str_radix(10))
        .map_err(|_| BrokerError::InvalidAmount(value.to_string()))
}

/// ABI-encode a state for hashing/signing.
pub fn pack_state(channel_id: B256, state: &UnsignedState) -> Result<Vec<u8>, BrokerError> {
    let allocations: Vec<(Address, Address, U256)> = state
        .allocations
        .iter()
        .map(|a| {
            Ok((
                a.participant,
                a.token_address,
                bigint_to_u256(&a.raw_amount)?,
            ))
        })
        .collect::<Result<_, BrokerError>>()?;

    Ok((
        channel_id,
        state.intent.as_u8() as u64,
        U256::from(state.version),
        Bytes::from(state.data.clone()),
        allocations,
    )
        .abi_encode())
}

/// keccak256 of the packed state; the digest both parties sign.
pub fn state_hash(channel_id: B256, state: &UnsignedState) -> Result<B256, BrokerError> {
    Ok(keccak256(pack_state(channel_id, state)?))
}

/// Broker-side state signature.
pub fn sign_state(
    signer: &PrivateKeySigner,
    channel_id: B256,
    state: &UnsignedState,
) -> Result<RpcSignature, BrokerError> {
    let hash = state_hash(channel_id, state)?;
    Ok(sign_payload_hash(signer, &hash)?)
}

/// Check a state signature against an expected signer address.
pub fn verify_state_signature(
    channel_id: B256,
    state: &UnsignedState,
    signature: &RpcSignature,
    expected: Address,
) -> Result<bool, BrokerError> {
    let hash = state_hash(channel_id, state)?;
    Ok(signature.recover(&hash)? == expected)
}

/// Resize payload carried in the state data: `int256[]{resize, allocate}`.
pub fn encode_resize_payload(
    resize_amount: &BigInt,
    allocate_amount: &BigInt,
) -> Result<Vec<u8>, BrokerError> {
    let payload = vec![
        bigint_to_i256(resize_amount)?,
        bigint_to_i256(allocate_amount)?,
    ];
    Ok(payload.abi_encode())
}

/// Deterministic app session id from its definition.
pub fn derive_app_session_id(
    participants: &[Address],
    quorum: u64,
    nonce: u64,
    timestamp: u64,
) -> String {
    let packed = (participants.to_vec(), quorum, nonce, timestamp).abi_encode_packed();
    channel_id_hex(keccak256(&packed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Allocation;
    use clearhouse_common::api::channel::StateIntent;

    fn sample_state() -> UnsignedState {
        UnsignedState {
            intent: StateIntent::Finalize,
            version: 5,
            data: Vec::new(),
            allocations: vec![
                Allocation {
                    participant: Address::repeat_byte(0x01),
                    token_address: Address::repeat_byte(0x02),
                    raw_amount: BigInt::from(1200u32),
                },
                Allocation {
                    participant: Address::repeat_byte(0x03),
                    token_address: Address::repeat_byte(0x02),
                    raw_amount: BigInt::from(0u32),
                },
            ],
        }
    }

    #[test]
    fn channel_id_is_deterministic() {
        let participants = [Address::repeat_byte(0x10), Address::repeat_byte(0x20)];
        let adjudicator = Address::repeat_byte(0x30);
        let a = derive_channel_id(&participants, adjudicator, 3600, 42, 137);
        let b = derive_channel_id(&participants, adjudicator, 3600, 42, 137);
        assert_eq!(a, b);
        // Any input change must move the id.
        let c = derive_channel_id(&participants, adjudicator, 3600, 43, 137);
        assert_ne!(a, c);
        let d = derive_channel_id(&participants, adjudicator, 3600, 42, 1);
        assert_ne!(a, d);
    }

    #[test]
    fn state_signature_round_trip() {
        let signer = PrivateKeySigner::random();
        let channel_id = B256::repeat_byte(0x44);
        let state = sample_state();
        let sig = sign_state(&signer, channel_id, &state).unwrap();
        assert!(verify_state_signature(channel_id, &state, &sig, signer.address()).unwrap());
        assert!(
            !verify_state_signature(channel_id, &state, &sig, Address::repeat_byte(0x09)).unwrap()
        );
    }

    #[test]
    fn packed_state_changes_with_version() {
        let channel_id = B256::repeat_byte(0x44);
        let mut state = sample_state();
        let a = state_hash(channel_id, &state).unwrap();
        state.version += 1;
        let b = state_hash(channel_id, &state).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn negative_allocation_is_rejected() {
        let mut state = sample_state();
        state.allocations[0].raw_amount = BigInt::from(-1);
        assert!(pack_state(B256::ZERO, &state).is_err());
    }

    #[test]
    fn resize_payload_encodes_signed_values() {
        let encoded = encode_resize_payload(&BigInt::from(-500), &BigInt::from(200)).unwrap();
        let decoded = <Vec<I256>>::abi_decode(&encoded, true).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], I256::from_dec_str("-500").unwrap());
        assert_eq!(decoded[1], I256::from_dec_str("200").unwrap());
    }
}
