mod policy;

pub use policy::*;

use std::{fmt, str::FromStr};

use alloy_primitives::{keccak256, Address, Signature, B256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid signature encoding")]
    InvalidEncoding,
    #[error("signature recovery failed")]
    RecoveryFailed,
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("invalid private key")]
    InvalidPrivateKey,
}

/// 65-byte secp256k1 signature (r || s || v) carried on the wire as a
/// 0x-prefixed hex string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcSignature(Signature);

impl RpcSignature {
    pub fn new(signature: Signature) -> Self {
        Self(signature)
    }

    pub fn from_hex(raw: &str) -> Result<Self, CryptoError> {
        let stripped = raw.strip_prefix("0x").unwrap_or(raw);
        let bytes = hex::decode(stripped).map_err(|_| CryptoError::InvalidEncoding)?;
        let signature =
            Signature::try_from(bytes.as_slice()).map_err(|_| CryptoError::InvalidEncoding)?;
        Ok(Self(signature))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0.as_bytes()))
    }

    /// Recover the signer of a pre-hashed payload.
    pub fn recover(&self, hash: &B256) -> Result<Address, CryptoError> {
        self.0
            .recover_address_from_prehash(hash)
            .map_err(|_| CryptoError::RecoveryFailed)
    }

    pub fn inner(&self) -> &Signature {
        &self.0
    }
}

impl fmt::Display for RpcSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for RpcSignature {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for RpcSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RpcSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(DeError::custom)
    }
}

/// Hash arbitrary payload bytes the way every signed message in the
/// protocol is hashed.
pub fn payload_hash(payload: &[u8]) -> B256 {
    keccak256(payload)
}

/// Sign raw payload bytes with a secp256k1 key (keccak256 then ECDSA).
pub fn sign_payload(signer: &PrivateKeySigner, payload: &[u8]) -> Result<RpcSignature, CryptoError> {
    sign_payload_hash(signer, &payload_hash(payload))
}

/// Sign an already-computed keccak256 digest.
pub fn sign_payload_hash(
    signer: &PrivateKeySigner,
    hash: &B256,
) -> Result<RpcSignature, CryptoError> {
    let signature = signer
        .sign_hash_sync(hash)
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
    Ok(RpcSignature::new(signature))
}

/// Recover the address that signed raw payload bytes.
pub fn recover_payload_signer(
    payload: &[u8],
    signature: &RpcSignature,
) -> Result<Address, CryptoError> {
    signature.recover(&payload_hash(payload))
}

/// Parse a 0x-prefixed 32-byte private key into a signer.
pub fn signer_from_hex(raw: &str) -> Result<PrivateKeySigner, CryptoError> {
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(stripped).map_err(|_| CryptoError::InvalidPrivateKey)?;
    if bytes.len() != 32 {
        return Err(CryptoError::InvalidPrivateKey);
    }
    let key = B256::from_slice(&bytes);
    PrivateKeySigner::from_bytes(&key).map_err(|_| CryptoError::InvalidPrivateKey)
}
