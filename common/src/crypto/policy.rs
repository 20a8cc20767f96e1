//! EIP-712 session policy signed by a wallet to delegate a session key.

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{sol, Eip712Domain, SolStruct};

use super::{CryptoError, RpcSignature};

sol! {
    /// Per-asset spending cap granted to a session key.
    struct Allowance {
        string asset;
        string amount;
    }

    /// The typed data a wallet signs to authorize a session key.
    struct Policy {
        string challenge;
        string scope;
        address wallet;
        address participant;
        uint256 expire;
        Allowance[] allowances;
    }
}

/// EIP-712 domain for a policy. The application name is the domain name so
/// wallets display which application is requesting the delegation.
pub fn policy_domain(application: &str) -> Eip712Domain {
    Eip712Domain {
        name: Some(application.to_owned().into()),
        version: Some("1".into()),
        chain_id: None,
        verifying_contract: None,
        salt: None,
    }
}

impl Policy {
    pub fn signing_hash(&self, application: &str) -> B256 {
        self.eip712_signing_hash(&policy_domain(application))
    }

    /// Recover the wallet that signed this policy.
    pub fn recover(
        &self,
        application: &str,
        signature: &RpcSignature,
    ) -> Result<Address, CryptoError> {
        signature.recover(&self.signing_hash(application))
    }
}

/// Build the policy for a challenge as the server expects it to be signed.
#[allow(clippy::too_many_arguments)]
pub fn build_policy(
    challenge: &str,
    scope: &str,
    wallet: Address,
    participant: Address,
    expire: U256,
    allowances: Vec<(String, String)>,
) -> Policy {
    Policy {
        challenge: challenge.to_string(),
        scope: scope.to_string(),
        wallet,
        participant,
        expire,
        allowances: allowances
            .into_iter()
            .map(|(asset, amount)| Allowance { asset, amount })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    #[test]
    fn policy_hash_is_deterministic() {
        let wallet = Address::ZERO;
        let participant = Address::repeat_byte(0x11);
        let a = build_policy(
            "uuid-1",
            "app.create",
            wallet,
            participant,
            U256::from(1_700_000_000u64),
            vec![("usdc".into(), "100".into())],
        );
        let b = build_policy(
            "uuid-1",
            "app.create",
            wallet,
            participant,
            U256::from(1_700_000_000u64),
            vec![("usdc".into(), "100".into())],
        );
        assert_eq!(a.signing_hash("demo"), b.signing_hash("demo"));
        // A different domain name must change the digest.
        assert_ne!(a.signing_hash("demo"), a.signing_hash("other"));
    }

    #[test]
    fn signed_policy_recovers_wallet() {
        let signer = PrivateKeySigner::random();
        let policy = build_policy(
            "challenge-token",
            "",
            signer.address(),
            Address::repeat_byte(0x22),
            U256::from(2_000_000_000u64),
            vec![],
        );
        let hash = policy.signing_hash("demo");
        let signature = RpcSignature::new(signer.sign_hash_sync(&hash).unwrap());
        let recovered = policy.recover("demo", &signature).unwrap();
        assert_eq!(recovered, signer.address());
    }
}
