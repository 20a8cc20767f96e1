//! The broker aggregate: storage, signer, asset/chain registries and the
//! shared RPC services hang off this one structure.

use std::{collections::HashMap, fs, num::NonZeroUsize, sync::Arc, time::Duration};

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use bigdecimal::BigDecimal;
use lru::LruCache;
use tokio::sync::Mutex;

use clearhouse_common::{
    account::AccountId,
    api::{
        app_session::AppSessionView,
        auth::SessionKeyView,
        channel::{ChannelStatus, ChannelView, StateAllocation, UnsignedStateView},
        ledger::{
            BalanceEntry, EntryRecord, RpcHistoryEntry, TransactionRecord, TransferParams,
            TransferResult,
        },
        AssetInfo, GetConfigResult, NetworkInfo, TokenInfo,
    },
    crypto::signer_from_hex,
    time::get_current_time_in_seconds,
    units,
};

use crate::{
    auth::{jwt::JwtKeys, AuthManager},
    config::{AssetRegistry, ChainConfig, NodeConfig, REQUEST_CACHE_TTL_SECS},
    notifier::Notifier,
    rpc::{hub::ConnectionHub, message_cache::MessageCache},
};

use super::{
    error::BrokerError,
    ledger,
    model::{AppSession, Channel, SessionKey, TransactionType, UnsignedState},
    storage::Store,
};

const SESSION_KEY_CACHE_SIZE: usize = 1024;

pub struct Broker {
    store: Store,
    signer: PrivateKeySigner,
    assets: AssetRegistry,
    chains: HashMap<u64, ChainConfig>,
    hub: Arc<ConnectionHub>,
    auth: AuthManager,
    message_cache: MessageCache,
    notifier: Notifier,
    /// Hot cache in front of the session_keys table; entries are evicted
    /// on revocation and when a wallet registers a replacement key.
    session_keys: Mutex<LruCache<Address, SessionKey>>,
}

impl Broker {
    pub fn new(config: &NodeConfig) -> Result<Arc<Self>, BrokerError> {
        let store = if config.db_path == ":memory:" {
            Store::in_memory()?
        } else {
            Store::open(&config.db_path)?
        };
        let signer = signer_from_hex(&config.broker_private_key)?;
        let jwt = JwtKeys::from_pem(
            &fs::read(&config.jwt_private_key_path)
                .map_err(|e| BrokerError::Any(anyhow::anyhow!("jwt private key: {}", e)))?,
            &fs::read(&config.jwt_public_key_path)
                .map_err(|e| BrokerError::Any(anyhow::anyhow!("jwt public key: {}", e)))?,
        )?;
        Ok(Self::with_parts(
            store,
            signer,
            AssetRegistry::new(config.assets.clone()),
            config.chains.clone(),
            jwt,
        ))
    }

    /// Assemble a broker from already-built parts. Tests use this with an
    /// in-memory store and fixture JWT keys.
    pub fn with_parts(
        store: Store,
        signer: PrivateKeySigner,
        assets: AssetRegistry,
        chains: Vec<ChainConfig>,
        jwt: JwtKeys,
    ) -> Arc<Self> {
        let hub = Arc::new(ConnectionHub::new());
        let notifier = Notifier::new(hub.clone(), signer.clone());
        Arc::new(Self {
            store,
            signer,
            assets,
            chains: chains.into_iter().map(|c| (c.id, c)).collect(),
            hub,
            auth: AuthManager::new(jwt),
            message_cache: MessageCache::new(Duration::from_secs(REQUEST_CACHE_TTL_SECS)),
            notifier,
            session_keys: Mutex::new(LruCache::new(
                NonZeroUsize::new(SESSION_KEY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    /// The broker's wallet address, participant[1] of every channel.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn assets(&self) -> &AssetRegistry {
        &self.assets
    }

    pub fn chains(&self) -> &HashMap<u64, ChainConfig> {
        &self.chains
    }

    pub fn chain(&self, chain_id: u64) -> Result<&ChainConfig, BrokerError> {
        self.chains
            .get(&chain_id)
            .ok_or(BrokerError::UnknownChain(chain_id))
    }

    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    pub fn message_cache(&self) -> &MessageCache {
        &self.message_cache
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    // ---- config & asset views ----------------------------------------

    pub fn config_view(&self) -> GetConfigResult {
        let mut networks: Vec<NetworkInfo> = self
            .chains
            .values()
            .map(|c| NetworkInfo {
                chain_id: c.id,
                name: c.name.clone(),
                custody_address: c.custody_address,
                adjudicator_address: c.adjudicator_address,
            })
            .collect();
        networks.sort_by_key(|n| n.chain_id);
        GetConfigResult {
            broker_address: self.address(),
            networks,
        }
    }

    pub fn asset_views(&self) -> Vec<AssetInfo> {
        self.assets
            .all()
            .iter()
            .filter(|a| !a.disabled)
            .map(|a| AssetInfo {
                symbol: a.symbol.clone(),
                name: a.name.clone(),
                tokens: a
                    .tokens
                    .iter()
                    .filter(|t| !t.disabled)
                    .map(|t| TokenInfo {
                        chain_id: t.blockchain_id,
                        address: t.address,
                        symbol: t.symbol.clone().unwrap_or_else(|| a.symbol.clone()),
                        decimals: t.decimals,
                    })
                    .collect(),
            })
            .collect()
    }

    // ---- ledger operations -------------------------------------------

    /// Instant off-chain transfer between two wallets.
    pub async fn transfer(
        &self,
        from: Address,
        params: TransferParams,
        session_key: Option<Address>,
    ) -> Result<TransferResult, BrokerError> {
        for allocation in &params.allocations {
            if !self.assets.supports(&allocation.asset) {
                return Err(BrokerError::UnknownAsset(allocation.asset.clone()));
            }
        }

        let destination = params.destination;
        let destination_tag = params.destination_user_tag.clone();
        let allocations = params.allocations.clone();

        let (transactions, to_wallet) = self
            .store
            .transaction(move |tx| {
                let to_wallet = match (destination, destination_tag.as_deref()) {
                    (Some(address), _) => address,
                    (None, Some(tag)) => tx
                        .wallet_by_tag(tag)?
                        .ok_or(BrokerError::DestinationNotFound)?,
                    (None, None) => {
                        return Err(BrokerError::InvalidRequest(
                            "destination or destination_user_tag required".to_string(),
                        ))
                    }
                };
                let to_account = AccountId::from_wallet(to_wallet);
                let transactions = ledger::transfer(tx, from, &to_account, &allocations, session_key)?;
                Ok((transactions, to_wallet))
            })
            .await?;

        let records: Vec<TransactionRecord> =
            transactions.iter().map(ledger::transaction_view).collect();

        // Balance + transfer pushes to both parties, post-commit.
        for wallet in [from, to_wallet] {
            let balances = self.get_ledger_balances(&AccountId::from_wallet(wallet)).await?;
            self.notifier.balance_update(wallet, balances).await;
            self.notifier.transfer(wallet, &records).await;
        }

        Ok(TransferResult {
            transactions: records,
        })
    }

    pub async fn get_ledger_balances(
        &self,
        account: &AccountId,
    ) -> Result<Vec<BalanceEntry>, BrokerError> {
        let account = account.clone();
        self.store
            .transaction(move |tx| tx.balances_for_account(&account))
            .await
    }

    pub async fn get_ledger_entries(
        &self,
        account: Option<String>,
        asset: Option<String>,
        wallet: Option<String>,
    ) -> Result<Vec<EntryRecord>, BrokerError> {
        self.store
            .transaction(move |tx| {
                let entries = tx.list_entries(
                    account.as_deref(),
                    asset.as_deref(),
                    wallet.as_deref(),
                    1000,
                )?;
                Ok(entries.iter().map(ledger::entry_view).collect())
            })
            .await
    }

    pub async fn get_ledger_transactions(
        &self,
        account: Option<String>,
        asset: Option<String>,
        tx_type: Option<TransactionType>,
    ) -> Result<Vec<TransactionRecord>, BrokerError> {
        self.store
            .transaction(move |tx| {
                let transactions =
                    tx.list_transactions(account.as_deref(), asset.as_deref(), tx_type, 1000)?;
                Ok(transactions.iter().map(ledger::transaction_view).collect())
            })
            .await
    }

    pub async fn get_rpc_history(
        &self,
        sender: Address,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<RpcHistoryEntry>, BrokerError> {
        self.store
            .transaction(move |tx| tx.list_rpc_records(sender, limit, offset))
            .await
    }

    pub async fn get_user_tag(&self, wallet: Address) -> Result<String, BrokerError> {
        self.store
            .transaction(move |tx| tx.get_or_create_user_tag(wallet))
            .await
    }

    // ---- session keys ------------------------------------------------

    /// Resolve a request signer to its active session key, if any.
    pub async fn session_key_for(
        &self,
        signer: Address,
    ) -> Result<Option<SessionKey>, BrokerError> {
        let now = get_current_time_in_seconds();
        {
            let mut cache = self.session_keys.lock().await;
            let hit = cache.get(&signer).cloned();
            if let Some(key) = hit {
                if key.is_active(now) {
                    return Ok(Some(key));
                }
                cache.pop(&signer);
            }
        }

        let key = self
            .store
            .transaction(move |tx| {
                Ok(tx
                    .get_session_key(signer)?
                    .filter(|key| key.is_active(now)))
            })
            .await?;
        if let Some(key) = &key {
            self.session_keys.lock().await.put(signer, key.clone());
        }
        Ok(key)
    }

    /// Persist a freshly authorized session key, expiring (and evicting)
    /// any live key of the same (wallet, application).
    pub async fn register_session_key(&self, key: SessionKey) -> Result<(), BrokerError> {
        let wallet = key.wallet;
        let application = key.application.clone();
        let cached_key = key.clone();
        self.store
            .transaction(move |tx| {
                tx.expire_session_keys(wallet, &application, get_current_time_in_seconds())?;
                tx.upsert_session_key(&key)
            })
            .await?;

        let mut cache = self.session_keys.lock().await;
        let stale: Vec<Address> = cache
            .iter()
            .filter(|(_, cached)| cached.wallet == wallet)
            .map(|(address, _)| *address)
            .collect();
        for address in stale {
            cache.pop(&address);
        }
        cache.put(cached_key.address, cached_key);
        Ok(())
    }

    pub async fn get_session_keys(
        &self,
        wallet: Address,
    ) -> Result<Vec<SessionKeyView>, BrokerError> {
        let now = get_current_time_in_seconds();
        let keys = self
            .store
            .transaction(move |tx| tx.active_session_keys(wallet, now))
            .await?;
        Ok(keys
            .into_iter()
            .map(|key| SessionKeyView {
                address: key.address,
                application: key.application,
                scope: key.scope,
                allowances: key.allowances,
                expires_at: key.expires_at,
                created_at: key.created_at,
            })
            .collect())
    }

    pub async fn revoke_session_key(
        &self,
        wallet: Address,
        key_address: Address,
    ) -> Result<bool, BrokerError> {
        let now = get_current_time_in_seconds();
        let revoked = self
            .store
            .transaction(move |tx| {
                let key = tx
                    .get_session_key(key_address)?
                    .ok_or(BrokerError::SessionKeyNotFound)?;
                if key.wallet != wallet {
                    return Err(BrokerError::SessionKeyNotFound);
                }
                tx.revoke_session_key(key_address, now)
            })
            .await?;
        self.session_keys.lock().await.pop(&key_address);
        Ok(revoked)
    }

    /// Remaining allowance of a session key for one asset:
    /// `cap − Σ(debits tagged with the key)`.
    pub async fn remaining_allowance(
        &self,
        key: &SessionKey,
        asset: &str,
    ) -> Result<BigDecimal, BrokerError> {
        let cap = key
            .allowance_for(asset)
            .ok_or_else(|| BrokerError::AssetNotAllowed(asset.to_string()))?
            .clone();
        let address = key.address;
        let asset = asset.to_string();
        let spent = self
            .store
            .transaction(move |tx| tx.session_key_spent(address, &asset))
            .await?;
        Ok(cap - spent)
    }

    // ---- views -------------------------------------------------------

    pub fn channel_view(&self, channel: &Channel) -> ChannelView {
        ChannelView {
            channel_id: channel.channel_id.clone(),
            chain_id: channel.chain_id,
            token: channel.token,
            wallet: channel.wallet,
            status: channel.status,
            raw_amount: BigDecimal::new(channel.raw_amount.clone(), 0),
            version: channel.state.version,
            created_at: channel.created_at,
            updated_at: channel.updated_at,
        }
    }

    pub fn state_view(&self, state: &UnsignedState) -> UnsignedStateView {
        UnsignedStateView {
            intent: state.intent,
            version: state.version,
            data: format!("0x{}", hex::encode(&state.data)),
            allocations: state
                .allocations
                .iter()
                .map(|a| StateAllocation {
                    participant: a.participant,
                    token_address: a.token_address,
                    raw_amount: BigDecimal::new(a.raw_amount.clone(), 0),
                })
                .collect(),
        }
    }

    pub fn app_session_view(&self, session: &AppSession) -> AppSessionView {
        AppSessionView {
            app_session_id: session.session_id.clone(),
            status: session.status,
            participants: session.participants.clone(),
            weights: session.weights.clone(),
            quorum: session.quorum,
            version: session.version,
            protocol: session.protocol.clone(),
            session_data: session.session_data.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }

    pub async fn get_channels(
        &self,
        wallet: Option<Address>,
        status: Option<ChannelStatus>,
    ) -> Result<Vec<ChannelView>, BrokerError> {
        let channels = self
            .store
            .transaction(move |tx| tx.list_channels(wallet, status))
            .await?;
        Ok(channels.iter().map(|c| self.channel_view(c)).collect())
    }

    /// Unified + escrow context used by close allocation math.
    pub async fn wallet_asset_balance(
        &self,
        wallet: Address,
        asset: &str,
    ) -> Result<BigDecimal, BrokerError> {
        let account = AccountId::from_wallet(wallet);
        let asset = asset.to_string();
        self.store
            .transaction(move |tx| tx.balance(&account, &account, &asset))
            .await
    }

    /// Sanity helper used by tests and reconciliation: a wallet's unified
    /// balance must never be negative outside a transaction.
    pub async fn assert_non_negative(&self, wallet: Address) -> Result<(), BrokerError> {
        let balances = self
            .get_ledger_balances(&AccountId::from_wallet(wallet))
            .await?;
        for balance in balances {
            if units::is_negative(&balance.amount) {
                return Err(BrokerError::InvalidAmount(format!(
                    "negative balance {} {}",
                    balance.amount, balance.asset
                )));
            }
        }
        Ok(())
    }
}
