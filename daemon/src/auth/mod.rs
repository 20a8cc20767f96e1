//! Challenge/sign/JWT authentication and the in-memory session registry.
//!
//! Flow: the client announces a wallet + session key (`auth_request`), the
//! server hands back a UUID challenge, the wallet signs an EIP-712 policy
//! embedding it (`auth_verify`), the server recovers the signer, persists
//! the session key and issues an ES256 JWT whose claims carry the policy.

pub mod jwt;

use std::{collections::HashMap, sync::Arc, time::Duration};

use alloy_primitives::{Address, U256};
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use clearhouse_common::{
    api::auth::{AuthAllowance, AuthRequestParams},
    crypto::{build_policy, RpcSignature},
    task::spawn_task,
    time::{get_current_time_in_seconds, TimestampSeconds},
};

use crate::config::{
    AUTH_CLEANUP_INTERVAL_SECS, CHALLENGE_TTL_SECS, MAX_LIVE_CHALLENGES, SESSION_TTL_SECS,
};
use crate::core::error::BrokerError;
use jwt::{JwtKeys, PolicyClaims};

#[derive(Debug, Clone)]
pub struct Challenge {
    pub token: String,
    pub address: Address,
    pub session_key: Address,
    pub application: String,
    pub allowances: Vec<AuthAllowance>,
    pub scope: String,
    pub session_key_expires_at: TimestampSeconds,
    pub expires_at: TimestampSeconds,
    pub completed: bool,
}

pub struct AuthManager {
    challenges: Mutex<HashMap<String, Challenge>>,
    /// Wallets with a live authenticated session and its expiry.
    sessions: Mutex<HashMap<Address, TimestampSeconds>>,
    jwt: JwtKeys,
}

impl AuthManager {
    pub fn new(jwt: JwtKeys) -> Self {
        Self {
            challenges: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            jwt,
        }
    }

    pub fn default_application() -> &'static str {
        "clearhouse"
    }

    /// Create a challenge for an auth request. Bounded to
    /// `MAX_LIVE_CHALLENGES` as a DoS guard.
    pub async fn create_challenge(
        &self,
        params: &AuthRequestParams,
    ) -> Result<String, BrokerError> {
        let now = get_current_time_in_seconds();
        let mut challenges = self.challenges.lock().await;
        if challenges.len() >= MAX_LIVE_CHALLENGES {
            challenges.retain(|_, c| c.expires_at > now);
            if challenges.len() >= MAX_LIVE_CHALLENGES {
                return Err(BrokerError::TooManyChallenges);
            }
        }

        let token = Uuid::new_v4().to_string();
        let challenge = Challenge {
            token: token.clone(),
            address: params.address,
            session_key: params.session_key,
            application: params
                .application
                .clone()
                .unwrap_or_else(|| Self::default_application().to_string()),
            allowances: params.allowances.clone(),
            scope: params.scope.clone().unwrap_or_default(),
            session_key_expires_at: params.expires_at.unwrap_or(now + SESSION_TTL_SECS),
            expires_at: now + CHALLENGE_TTL_SECS,
            completed: false,
        };
        challenges.insert(token.clone(), challenge);
        Ok(token)
    }

    /// Validate the signed policy for a pending challenge. On success the
    /// challenge is marked complete and returned for session key
    /// persistence and JWT issuance.
    pub async fn verify_challenge(
        &self,
        token: &str,
        signature: &RpcSignature,
    ) -> Result<Challenge, BrokerError> {
        let now = get_current_time_in_seconds();
        let mut challenges = self.challenges.lock().await;
        let challenge = challenges
            .get_mut(token)
            .ok_or(BrokerError::ChallengeNotFound)?;
        if challenge.completed {
            return Err(BrokerError::ChallengeNotFound);
        }
        if challenge.expires_at <= now {
            return Err(BrokerError::ChallengeExpired);
        }

        let policy = build_policy(
            &challenge.token,
            &challenge.scope,
            challenge.address,
            challenge.session_key,
            U256::from(challenge.session_key_expires_at),
            challenge
                .allowances
                .iter()
                .map(|a| (a.asset.clone(), a.amount.normalized().to_string()))
                .collect(),
        );
        let recovered = policy.recover(&challenge.application, signature)?;
        if recovered != challenge.address {
            return Err(BrokerError::InvalidSignature);
        }

        challenge.completed = true;
        Ok(challenge.clone())
    }

    pub async fn register_session(&self, wallet: Address) {
        let expires = get_current_time_in_seconds() + SESSION_TTL_SECS;
        self.sessions.lock().await.insert(wallet, expires);
    }

    pub async fn session_active(&self, wallet: Address) -> bool {
        let now = get_current_time_in_seconds();
        self.sessions
            .lock()
            .await
            .get(&wallet)
            .map(|expires| *expires > now)
            .unwrap_or(false)
    }

    pub fn issue_jwt(&self, challenge: &Challenge) -> Result<String, BrokerError> {
        let policy = PolicyClaims {
            challenge: challenge.token.clone(),
            scope: challenge.scope.clone(),
            wallet: challenge.address,
            participant: challenge.session_key,
            expire: challenge.session_key_expires_at,
            allowances: challenge.allowances.clone(),
        };
        self.jwt.issue(challenge.address, policy, SESSION_TTL_SECS)
    }

    pub fn verify_jwt(&self, token: &str) -> Result<jwt::Claims, BrokerError> {
        self.jwt.verify(token)
    }

    /// Drop expired challenges and sessions. Returns what was removed.
    pub async fn cleanup(&self) -> (usize, usize) {
        let now = get_current_time_in_seconds();
        let mut challenges = self.challenges.lock().await;
        let before_challenges = challenges.len();
        challenges.retain(|_, c| c.expires_at > now && !c.completed);
        let removed_challenges = before_challenges - challenges.len();
        drop(challenges);

        let mut sessions = self.sessions.lock().await;
        let before_sessions = sessions.len();
        sessions.retain(|_, expires| *expires > now);
        let removed_sessions = before_sessions - sessions.len();

        (removed_challenges, removed_sessions)
    }

    pub async fn live_challenges(&self) -> usize {
        self.challenges.lock().await.len()
    }
}

/// Periodic auth cleanup, stopped via the process shutdown signal.
pub fn start_auth_cleaner(broker: Arc<crate::core::broker::Broker>, mut shutdown: watch::Receiver<bool>) {
    spawn_task("auth-cleaner", async move {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(AUTH_CLEANUP_INTERVAL_SECS));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (challenges, sessions) = broker.auth().cleanup().await;
                    if challenges > 0 || sessions > 0 {
                        debug!(
                            "Auth cleanup removed {} challenge(s), {} session(s)",
                            challenges, sessions
                        );
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_signer_local::PrivateKeySigner;
    use bigdecimal::BigDecimal;
    use clearhouse_common::crypto::sign_payload_hash;

    const PRIVATE_PEM: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/jwt_es256.pem"));
    const PUBLIC_PEM: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/jwt_es256.pub.pem"
    ));

    fn manager() -> AuthManager {
        AuthManager::new(JwtKeys::from_pem(PRIVATE_PEM.as_bytes(), PUBLIC_PEM.as_bytes()).unwrap())
    }

    fn request(wallet: &PrivateKeySigner, session_key: Address) -> AuthRequestParams {
        AuthRequestParams {
            address: wallet.address(),
            session_key,
            application: Some("demo".into()),
            allowances: vec![AuthAllowance {
                asset: "usdc".into(),
                amount: BigDecimal::from(500u32),
            }],
            expires_at: None,
            scope: Some("app.transfer".into()),
        }
    }

    async fn sign_challenge(
        manager: &AuthManager,
        wallet: &PrivateKeySigner,
        token: &str,
    ) -> RpcSignature {
        let challenges = manager.challenges.lock().await;
        let challenge = challenges.get(token).unwrap();
        let policy = build_policy(
            &challenge.token,
            &challenge.scope,
            challenge.address,
            challenge.session_key,
            U256::from(challenge.session_key_expires_at),
            challenge
                .allowances
                .iter()
                .map(|a| (a.asset.clone(), a.amount.normalized().to_string()))
                .collect(),
        );
        let hash = policy.signing_hash(&challenge.application);
        sign_payload_hash(wallet, &hash).unwrap()
    }

    #[tokio::test]
    async fn full_challenge_flow_issues_jwt() {
        let manager = manager();
        let wallet = PrivateKeySigner::random();
        let session_key = Address::repeat_byte(0xA1);

        let token = manager
            .create_challenge(&request(&wallet, session_key))
            .await
            .unwrap();
        let signature = sign_challenge(&manager, &wallet, &token).await;
        let challenge = manager.verify_challenge(&token, &signature).await.unwrap();
        assert_eq!(challenge.session_key, session_key);

        let jwt = manager.issue_jwt(&challenge).unwrap();
        let claims = manager.verify_jwt(&jwt).unwrap();
        assert_eq!(claims.sub, wallet.address().to_checksum(None));
        assert_eq!(claims.policy.participant, session_key);

        // A completed challenge cannot be replayed.
        let replay = manager.verify_challenge(&token, &signature).await;
        assert!(matches!(replay, Err(BrokerError::ChallengeNotFound)));
    }

    #[tokio::test]
    async fn wrong_signer_is_rejected() {
        let manager = manager();
        let wallet = PrivateKeySigner::random();
        let stranger = PrivateKeySigner::random();
        let token = manager
            .create_challenge(&request(&wallet, Address::repeat_byte(0xA1)))
            .await
            .unwrap();
        let signature = sign_challenge(&manager, &stranger, &token).await;
        let result = manager.verify_challenge(&token, &signature).await;
        assert!(matches!(result, Err(BrokerError::InvalidSignature)));
    }

    #[tokio::test]
    async fn challenge_limit_is_enforced() {
        let manager = manager();
        let wallet = PrivateKeySigner::random();
        for _ in 0..MAX_LIVE_CHALLENGES {
            manager
                .create_challenge(&request(&wallet, Address::repeat_byte(0xA1)))
                .await
                .unwrap();
        }
        let result = manager
            .create_challenge(&request(&wallet, Address::repeat_byte(0xA1)))
            .await;
        assert!(matches!(result, Err(BrokerError::TooManyChallenges)));
    }

    #[tokio::test]
    async fn cleanup_drops_completed_challenges() {
        let manager = manager();
        let wallet = PrivateKeySigner::random();
        let token = manager
            .create_challenge(&request(&wallet, Address::repeat_byte(0xA1)))
            .await
            .unwrap();
        let signature = sign_challenge(&manager, &wallet, &token).await;
        manager.verify_challenge(&token, &signature).await.unwrap();

        let (removed, _) = manager.cleanup().await;
        assert_eq!(removed, 1);
        assert_eq!(manager.live_challenges().await, 0);
    }
}
