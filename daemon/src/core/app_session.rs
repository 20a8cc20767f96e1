//! Multi-party application sessions: shared pots of funds with
//! quorum-weighted state transitions.
//!
//! Funds enter the session account on create, are redistributed internally
//! on submit (total per asset is conserved) and leave on close. The quorum
//! is an explicit weighted threshold, not a majority: the summed weights of
//! the request signers must reach it for any state change.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::Address;
use bigdecimal::BigDecimal;

use clearhouse_common::{
    account::{AccountId, AccountType},
    api::app_session::{
        AppAllocation, AppSessionStatus, AppSessionView, CloseAppSessionParams,
        CreateAppSessionParams, SubmitAppStateParams,
    },
    time::get_current_time_in_millis,
    units,
};

use super::{
    broker::Broker,
    error::BrokerError,
    model::{AppSession, TransactionType},
    state,
    storage::StoreTx,
};

/// Weighted-quorum gate: distinct signers that are participants must carry
/// enough combined weight.
fn verify_quorum(
    participants: &[Address],
    weights: &[u64],
    quorum: u64,
    signers: &[Address],
) -> Result<(), BrokerError> {
    let distinct: BTreeSet<&Address> = signers.iter().collect();
    let mut total = 0u64;
    for signer in distinct {
        if let Some(index) = participants.iter().position(|p| p == signer) {
            total = total.saturating_add(weights.get(index).copied().unwrap_or(0));
        }
    }
    if total >= quorum {
        Ok(())
    } else {
        Err(BrokerError::QuorumNotMet)
    }
}

/// Target per-(participant, asset) amounts from the request allocations.
fn target_allocations(
    participants: &[Address],
    allocations: &[AppAllocation],
) -> Result<BTreeMap<(String, String), BigDecimal>, BrokerError> {
    let mut targets: BTreeMap<(String, String), BigDecimal> = BTreeMap::new();
    for allocation in allocations {
        if units::is_negative(&allocation.amount) {
            return Err(BrokerError::InvalidAmount(allocation.amount.to_string()));
        }
        if !participants.contains(&allocation.participant) {
            return Err(BrokerError::AllocationMismatch(format!(
                "{} is not a participant",
                allocation.participant
            )));
        }
        let key = (
            AccountId::from_wallet(allocation.participant).as_str().to_string(),
            allocation.asset.clone(),
        );
        *targets.entry(key).or_insert_with(units::zero) += allocation.amount.clone();
    }
    Ok(targets)
}

/// Per-asset totals must be conserved across a redistribution.
fn verify_conservation(
    current: &BTreeMap<(String, String), BigDecimal>,
    target: &BTreeMap<(String, String), BigDecimal>,
) -> Result<(), BrokerError> {
    let mut current_totals: BTreeMap<&str, BigDecimal> = BTreeMap::new();
    for ((_, asset), amount) in current {
        *current_totals.entry(asset).or_insert_with(units::zero) += amount.clone();
    }
    let mut target_totals: BTreeMap<&str, BigDecimal> = BTreeMap::new();
    for ((_, asset), amount) in target {
        *target_totals.entry(asset).or_insert_with(units::zero) += amount.clone();
    }
    for (asset, total) in &target_totals {
        let held = current_totals.get(asset).cloned().unwrap_or_else(units::zero);
        if &held != total {
            return Err(BrokerError::AllocationMismatch(format!(
                "asset {}: allocated {} but session holds {}",
                asset, total, held
            )));
        }
    }
    for (asset, held) in &current_totals {
        if held != &units::zero() && !target_totals.contains_key(asset) {
            return Err(BrokerError::AllocationMismatch(format!(
                "asset {} held by the session is missing from allocations",
                asset
            )));
        }
    }
    Ok(())
}

fn current_balances(
    tx: &StoreTx<'_>,
    session_account: &AccountId,
) -> Result<BTreeMap<(String, String), BigDecimal>, BrokerError> {
    Ok(tx
        .session_participant_balances(session_account)?
        .into_iter()
        .collect())
}

impl Broker {
    /// Open a session: move each participant's initial allocation from
    /// their wallet into the session account, atomically.
    pub async fn create_app_session(
        &self,
        signers: &[Address],
        params: CreateAppSessionParams,
    ) -> Result<AppSessionView, BrokerError> {
        let definition = params.definition.clone();
        if definition.participants.is_empty()
            || definition.participants.len() != definition.weights.len()
        {
            return Err(BrokerError::InvalidRequest(
                "participants and weights must be non-empty and of equal length".to_string(),
            ));
        }
        if definition.quorum == 0 {
            return Err(BrokerError::InvalidRequest(
                "quorum must be positive".to_string(),
            ));
        }
        verify_quorum(
            &definition.participants,
            &definition.weights,
            definition.quorum,
            signers,
        )?;
        for allocation in &params.allocations {
            if !self.assets().supports(&allocation.asset) {
                return Err(BrokerError::UnknownAsset(allocation.asset.clone()));
            }
        }

        let allocations = params.allocations.clone();
        let session_data = params.session_data.clone();
        let now = get_current_time_in_millis();
        let session_id = state::derive_app_session_id(
            &definition.participants,
            definition.quorum,
            definition.nonce,
            now,
        );
        let session_id_for_tx = session_id.clone();

        let session = self
            .store()
            .transaction(move |tx| {
                for participant in &definition.participants {
                    if tx.has_challenged_channel(*participant)? {
                        return Err(BrokerError::ChallengedChannelExists);
                    }
                }

                let session_account = AccountId::new(session_id_for_tx.clone());
                for allocation in &allocations {
                    if !definition.participants.contains(&allocation.participant) {
                        return Err(BrokerError::AllocationMismatch(format!(
                            "{} is not a participant",
                            allocation.participant
                        )));
                    }
                    if !units::is_positive(&allocation.amount) {
                        if allocation.amount == units::zero() {
                            continue;
                        }
                        return Err(BrokerError::InvalidAmount(allocation.amount.to_string()));
                    }
                    let wallet_account = AccountId::from_wallet(allocation.participant);
                    let balance = tx.balance(&wallet_account, &wallet_account, &allocation.asset)?;
                    if balance < allocation.amount {
                        return Err(BrokerError::InsufficientBalance);
                    }
                    tx.record(
                        &wallet_account,
                        AccountType::Wallet,
                        &allocation.asset,
                        &wallet_account,
                        &(-&allocation.amount),
                        None,
                    )?;
                    tx.record(
                        &session_account,
                        AccountType::AppSession,
                        &allocation.asset,
                        &wallet_account,
                        &allocation.amount,
                        None,
                    )?;
                    tx.record_transaction(
                        TransactionType::AppDeposit,
                        &wallet_account,
                        &session_account,
                        &allocation.asset,
                        &allocation.amount,
                    )?;
                }

                let session = AppSession {
                    session_id: session_id_for_tx.clone(),
                    participants: definition.participants.clone(),
                    weights: definition.weights.clone(),
                    quorum: definition.quorum,
                    challenge: definition.challenge.unwrap_or(0),
                    nonce: definition.nonce,
                    protocol: definition.protocol.clone(),
                    session_data: session_data.clone(),
                    status: AppSessionStatus::Open,
                    version: 1,
                    created_at: now,
                    updated_at: now,
                };
                tx.insert_app_session(&session)?;
                Ok(session)
            })
            .await?;

        let view = self.app_session_view(&session);
        self.notifier()
            .app_session_update(&session.participants, &view)
            .await;
        for participant in &session.participants {
            let balances = self
                .get_ledger_balances(&AccountId::from_wallet(*participant))
                .await?;
            self.notifier().balance_update(*participant, balances).await;
        }
        Ok(view)
    }

    /// Redistribute session-internal ownership. Funds never leave the
    /// session account here; totals per asset are conserved.
    pub async fn submit_app_state(
        &self,
        signers: &[Address],
        params: SubmitAppStateParams,
    ) -> Result<AppSessionView, BrokerError> {
        let signers = signers.to_vec();
        let session_id = params.app_session_id.clone();
        let allocations = params.allocations.clone();
        let session_data = params.session_data.clone();
        let new_version = params.version;

        let session = self
            .store()
            .transaction(move |tx| {
                let session = tx
                    .get_app_session(&session_id)?
                    .ok_or_else(|| BrokerError::AppSessionNotFound(session_id.clone()))?;
                if session.status != AppSessionStatus::Open {
                    return Err(BrokerError::AppSessionNotOpen(
                        session.status.as_str().to_string(),
                    ));
                }
                verify_quorum(
                    &session.participants,
                    &session.weights,
                    session.quorum,
                    &signers,
                )?;
                if new_version <= session.version {
                    return Err(BrokerError::StaleVersion(session.version));
                }

                let session_account = AccountId::new(session.session_id.clone());
                let current = current_balances(tx, &session_account)?;
                let target = target_allocations(&session.participants, &allocations)?;
                verify_conservation(&current, &target)?;

                // Apply deltas; every (participant, asset) seen on either
                // side moves to its target.
                let mut keys: BTreeSet<(String, String)> = current.keys().cloned().collect();
                keys.extend(target.keys().cloned());
                for key in keys {
                    let held = current.get(&key).cloned().unwrap_or_else(units::zero);
                    let wanted = target.get(&key).cloned().unwrap_or_else(units::zero);
                    let delta = wanted - held;
                    if delta == units::zero() {
                        continue;
                    }
                    let wallet_account = AccountId::new(key.0.clone());
                    tx.record(
                        &session_account,
                        AccountType::AppSession,
                        &key.1,
                        &wallet_account,
                        &delta,
                        None,
                    )?;
                }

                tx.update_app_session(
                    &session.session_id,
                    new_version,
                    AppSessionStatus::Open,
                    session_data.as_deref(),
                )?;
                tx.get_app_session(&session.session_id)?
                    .ok_or_else(|| BrokerError::AppSessionNotFound(session.session_id.clone()))
            })
            .await?;

        let view = self.app_session_view(&session);
        self.notifier()
            .app_session_update(&session.participants, &view)
            .await;
        Ok(view)
    }

    /// Final redistribution, then funds flow back to the participants'
    /// wallets and the session closes.
    pub async fn close_app_session(
        &self,
        signers: &[Address],
        params: CloseAppSessionParams,
    ) -> Result<AppSessionView, BrokerError> {
        let signers = signers.to_vec();
        let session_id = params.app_session_id.clone();
        let allocations = params.allocations.clone();
        let session_data = params.session_data.clone();

        let session = self
            .store()
            .transaction(move |tx| {
                let session = tx
                    .get_app_session(&session_id)?
                    .ok_or_else(|| BrokerError::AppSessionNotFound(session_id.clone()))?;
                if session.status != AppSessionStatus::Open {
                    return Err(BrokerError::AppSessionNotOpen(
                        session.status.as_str().to_string(),
                    ));
                }
                verify_quorum(
                    &session.participants,
                    &session.weights,
                    session.quorum,
                    &signers,
                )?;

                let session_account = AccountId::new(session.session_id.clone());
                let current = current_balances(tx, &session_account)?;
                let target = target_allocations(&session.participants, &allocations)?;
                verify_conservation(&current, &target)?;

                // Zero the session account and pay out the final split.
                for (key, held) in &current {
                    if held == &units::zero() {
                        continue;
                    }
                    let wallet_account = AccountId::new(key.0.clone());
                    tx.record(
                        &session_account,
                        AccountType::AppSession,
                        &key.1,
                        &wallet_account,
                        &(-held),
                        None,
                    )?;
                }
                for (key, wanted) in &target {
                    if wanted == &units::zero() {
                        continue;
                    }
                    let wallet_account = AccountId::new(key.0.clone());
                    tx.record(
                        &wallet_account,
                        AccountType::Wallet,
                        &key.1,
                        &wallet_account,
                        wanted,
                        None,
                    )?;
                    tx.record_transaction(
                        TransactionType::AppWithdrawal,
                        &session_account,
                        &wallet_account,
                        &key.1,
                        wanted,
                    )?;
                }

                tx.update_app_session(
                    &session.session_id,
                    session.version + 1,
                    AppSessionStatus::Closed,
                    session_data.as_deref(),
                )?;
                tx.get_app_session(&session.session_id)?
                    .ok_or_else(|| BrokerError::AppSessionNotFound(session.session_id.clone()))
            })
            .await?;

        let view = self.app_session_view(&session);
        self.notifier()
            .app_session_update(&session.participants, &view)
            .await;
        for participant in &session.participants {
            let balances = self
                .get_ledger_balances(&AccountId::from_wallet(*participant))
                .await?;
            self.notifier().balance_update(*participant, balances).await;
        }
        Ok(view)
    }

    pub async fn get_app_sessions(
        &self,
        participant: Option<Address>,
        status: Option<AppSessionStatus>,
    ) -> Result<Vec<AppSessionView>, BrokerError> {
        let sessions = self
            .store()
            .transaction(move |tx| tx.list_app_sessions(participant, status))
            .await?;
        Ok(sessions.iter().map(|s| self.app_session_view(s)).collect())
    }
}
