//! ES256 JWT issuance and verification. Claims embed the signed policy so
//! a reconnecting client proves both identity and delegation scope.

use alloy_primitives::Address;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use clearhouse_common::{
    api::auth::AuthAllowance,
    time::{get_current_time_in_seconds, TimestampSeconds},
};

use crate::core::error::BrokerError;

pub const JWT_ISSUER: &str = "clearhouse";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyClaims {
    pub challenge: String,
    pub scope: String,
    pub wallet: Address,
    pub participant: Address,
    pub expire: TimestampSeconds,
    pub allowances: Vec<AuthAllowance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Checksummed wallet address.
    pub sub: String,
    pub iss: String,
    pub iat: TimestampSeconds,
    pub exp: TimestampSeconds,
    pub policy: PolicyClaims,
}

pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    /// Load an ES256 keypair from PEM (PKCS#8 private key, SPKI public).
    pub fn from_pem(private_pem: &[u8], public_pem: &[u8]) -> Result<Self, BrokerError> {
        let encoding = EncodingKey::from_ec_pem(private_pem)
            .map_err(|e| BrokerError::Any(anyhow::anyhow!("invalid JWT signing key: {}", e)))?;
        let decoding = DecodingKey::from_ec_pem(public_pem)
            .map_err(|e| BrokerError::Any(anyhow::anyhow!("invalid JWT verification key: {}", e)))?;
        Ok(Self { encoding, decoding })
    }

    pub fn issue(
        &self,
        wallet: Address,
        policy: PolicyClaims,
        ttl_secs: u64,
    ) -> Result<String, BrokerError> {
        let now = get_current_time_in_seconds();
        let claims = Claims {
            sub: wallet.to_checksum(None),
            iss: JWT_ISSUER.to_string(),
            iat: now,
            exp: now + ttl_secs,
            policy,
        };
        encode(&Header::new(Algorithm::ES256), &claims, &self.encoding)
            .map_err(|e| BrokerError::Any(anyhow::anyhow!("JWT encoding failed: {}", e)))
    }

    /// Verify signature, expiry and issuer; expired or foreign tokens are
    /// client-safe rejections.
    pub fn verify(&self, token: &str) -> Result<Claims, BrokerError> {
        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_issuer(&[JWT_ISSUER]);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| BrokerError::InvalidRequest(format!("invalid JWT: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIVATE_PEM: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/jwt_es256.pem"));
    const PUBLIC_PEM: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/jwt_es256.pub.pem"
    ));

    fn keys() -> JwtKeys {
        JwtKeys::from_pem(PRIVATE_PEM.as_bytes(), PUBLIC_PEM.as_bytes()).unwrap()
    }

    fn policy(wallet: Address) -> PolicyClaims {
        PolicyClaims {
            challenge: "uuid".into(),
            scope: String::new(),
            wallet,
            participant: Address::repeat_byte(0x11),
            expire: get_current_time_in_seconds() + 3600,
            allowances: vec![],
        }
    }

    #[test]
    fn issue_and_verify_round_trip() {
        let keys = keys();
        let wallet = Address::repeat_byte(0x01);
        let token = keys.issue(wallet, policy(wallet), 3600).unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, wallet.to_checksum(None));
        assert_eq!(claims.iss, JWT_ISSUER);
        assert_eq!(claims.policy.participant, Address::repeat_byte(0x11));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let keys = keys();
        let wallet = Address::repeat_byte(0x01);
        let token = keys.issue(wallet, policy(wallet), 3600).unwrap();
        let mut tampered = token.clone();
        tampered.truncate(token.len() - 2);
        assert!(keys.verify(&tampered).is_err());
    }
}
