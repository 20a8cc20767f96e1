//! Channel lifecycle operations driven by RPC requests.
//!
//! Each operation verifies ownership, refuses to act while the wallet has a
//! challenged channel, computes the next `UnsignedState` and returns it with
//! the broker's signature. Status transitions triggered by chain events are
//! handled by the ingestor, not here.

use alloy_primitives::Address;
use bigdecimal::num_bigint::BigInt;

use clearhouse_common::{
    account::{AccountId, AccountType},
    api::channel::{
        ChannelOperationResult, ChannelStatus, CloseChannelParams, CreateChannelParams,
        ResizeChannelParams, StateIntent,
    },
    time::get_current_time_in_millis,
    units,
};

use crate::config::MIN_CHANNEL_CHALLENGE_SECS;

use super::{
    broker::Broker,
    error::BrokerError,
    model::{Allocation, TransactionType, UnsignedState},
    state,
};

impl Broker {
    /// Prepare a brand-new channel: derive its id and sign the initial
    /// state. Nothing is persisted; the on-chain Created event births the
    /// channel row.
    pub async fn request_create_channel(
        &self,
        wallet: Address,
        params: CreateChannelParams,
    ) -> Result<ChannelOperationResult, BrokerError> {
        let chain = self.chain(params.chain_id)?.clone();
        if self.assets().by_token(params.chain_id, params.token).is_none() {
            return Err(BrokerError::UnknownAsset(params.token.to_checksum(None)));
        }

        let token = params.token;
        let chain_id = params.chain_id;
        self.store()
            .transaction(move |tx| {
                if tx.has_challenged_channel(wallet)? {
                    return Err(BrokerError::ChallengedChannelExists);
                }
                if tx.find_open_channel(wallet, token, chain_id)?.is_some() {
                    return Err(BrokerError::ChannelAlreadyExists);
                }
                Ok(())
            })
            .await?;

        let participants = [wallet, self.address()];
        let nonce = get_current_time_in_millis();
        let channel_id = state::derive_channel_id(
            &participants,
            chain.adjudicator_address,
            MIN_CHANNEL_CHALLENGE_SECS,
            nonce,
            params.chain_id,
        );

        let initial_state = UnsignedState {
            intent: StateIntent::Initialize,
            version: 0,
            data: Vec::new(),
            allocations: vec![
                Allocation {
                    participant: wallet,
                    token_address: params.token,
                    raw_amount: BigInt::from(0),
                },
                Allocation {
                    participant: self.address(),
                    token_address: params.token,
                    raw_amount: BigInt::from(0),
                },
            ],
        };
        let signature = state::sign_state(self.signer(), channel_id, &initial_state)?;

        Ok(ChannelOperationResult {
            channel_id: state::channel_id_hex(channel_id),
            state: self.state_view(&initial_state),
            state_signature: signature.to_hex(),
            channel: None,
        })
    }

    /// Re-balance a channel against the wallet's unified balance
    /// (`allocate_amount`) and/or deposit/withdraw on chain
    /// (`resize_amount`). Negative resizes lock funds in the channel escrow
    /// until the Resized event confirms.
    pub async fn request_resize_channel(
        &self,
        wallet: Address,
        params: ResizeChannelParams,
    ) -> Result<ChannelOperationResult, BrokerError> {
        let allocate = params
            .allocate_amount
            .as_ref()
            .map(|a| units::to_raw_units(a, 0))
            .transpose()?
            .unwrap_or_else(|| BigInt::from(0));
        let resize = params
            .resize_amount
            .as_ref()
            .map(|a| units::to_raw_units(a, 0))
            .transpose()?
            .unwrap_or_else(|| BigInt::from(0));
        if allocate == BigInt::from(0) && resize == BigInt::from(0) {
            return Err(BrokerError::InvalidRequest(
                "resize requires a non-zero allocate_amount or resize_amount".to_string(),
            ));
        }

        let broker_address = self.address();
        let signer = self.signer().clone();
        let assets = self.assets().clone();
        let channel_id_raw = params.channel_id.clone();
        let funds_destination = params.funds_destination;

        let (channel, result_state, signature) = self
            .store()
            .transaction(move |tx| {
                let mut channel = tx
                    .get_channel(&channel_id_raw)?
                    .ok_or_else(|| BrokerError::ChannelNotFound(channel_id_raw.clone()))?;
                if channel.wallet != wallet {
                    return Err(BrokerError::InvalidRequest(
                        "channel does not belong to caller".to_string(),
                    ));
                }
                if tx.has_challenged_channel(wallet)? {
                    return Err(BrokerError::ChallengedChannelExists);
                }
                match channel.status {
                    ChannelStatus::Open => {}
                    ChannelStatus::Resizing => return Err(BrokerError::ResizeAlreadyOngoing),
                    status => {
                        return Err(BrokerError::ChannelNotOpen(status.as_str().to_string()))
                    }
                }

                let (symbol, decimals) = assets
                    .by_token(channel.chain_id, channel.token)
                    .map(|(s, d)| (s.to_string(), d))
                    .ok_or_else(|| {
                        BrokerError::UnknownAsset(channel.token.to_checksum(None))
                    })?;

                let wallet_account = AccountId::from_wallet(wallet);
                let channel_account = AccountId::new(channel.channel_id.clone());

                if allocate != BigInt::from(0) {
                    // The unified balance must cover the full allocated
                    // channel amount after the shift.
                    let balance = tx.balance(&wallet_account, &wallet_account, &symbol)?;
                    let balance_raw = units::to_raw_units_floor(&balance, decimals)?;
                    if balance_raw < &channel.raw_amount + &allocate {
                        return Err(BrokerError::InsufficientBalance);
                    }
                }

                let new_raw = &channel.raw_amount + &allocate + &resize;
                if new_raw.sign() == bigdecimal::num_bigint::Sign::Minus {
                    return Err(BrokerError::InvalidAmount(new_raw.to_string()));
                }

                if resize.sign() == bigdecimal::num_bigint::Sign::Minus {
                    // Withdrawal: lock the amount into channel escrow. Only
                    // the Resized event completes the transfer out.
                    let locked = units::from_raw_units(&(-&resize), decimals);
                    let balance = tx.balance(&wallet_account, &wallet_account, &symbol)?;
                    if balance < locked {
                        return Err(BrokerError::InsufficientBalance);
                    }
                    tx.record(
                        &wallet_account,
                        AccountType::Wallet,
                        &symbol,
                        &wallet_account,
                        &(-&locked),
                        None,
                    )?;
                    tx.record(
                        &channel_account,
                        AccountType::Channel,
                        &symbol,
                        &wallet_account,
                        &locked,
                        None,
                    )?;
                    tx.record_transaction(
                        TransactionType::EscrowLock,
                        &wallet_account,
                        &channel_account,
                        &symbol,
                        &locked,
                    )?;
                }

                let destination = funds_destination.unwrap_or(wallet);
                let new_state = UnsignedState {
                    intent: StateIntent::Resize,
                    version: channel.state.version + 1,
                    data: state::encode_resize_payload(&resize, &allocate)?,
                    allocations: vec![
                        Allocation {
                            participant: destination,
                            token_address: channel.token,
                            raw_amount: new_raw,
                        },
                        Allocation {
                            participant: broker_address,
                            token_address: channel.token,
                            raw_amount: BigInt::from(0),
                        },
                    ],
                };
                let channel_id = state::parse_channel_id(&channel.channel_id)?;
                let signature = state::sign_state(&signer, channel_id, &new_state)?;

                channel.status = ChannelStatus::Resizing;
                channel.state = new_state.clone();
                channel.server_sig = Some(signature.clone());
                channel.user_sig = None;
                tx.update_channel(&channel)?;

                Ok((channel, new_state, signature))
            })
            .await?;

        let view = self.channel_view(&channel);
        self.notifier().channel_update(wallet, &view).await;

        Ok(ChannelOperationResult {
            channel_id: channel.channel_id.clone(),
            state: self.state_view(&result_state),
            state_signature: signature.to_hex(),
            channel: Some(view),
        })
    }

    /// Final allocation: the user takes `min(unified + escrow, channel
    /// funds)`, the broker keeps the remainder. Any surplus stays in the
    /// unified balance for other channels.
    pub async fn request_close_channel(
        &self,
        wallet: Address,
        params: CloseChannelParams,
    ) -> Result<ChannelOperationResult, BrokerError> {
        let broker_address = self.address();
        let signer = self.signer().clone();
        let assets = self.assets().clone();
        let channel_id_raw = params.channel_id.clone();
        let funds_destination = params.funds_destination;

        let (channel, final_state, signature) = self
            .store()
            .transaction(move |tx| {
                let mut channel = tx
                    .get_channel(&channel_id_raw)?
                    .ok_or_else(|| BrokerError::ChannelNotFound(channel_id_raw.clone()))?;
                if channel.wallet != wallet {
                    return Err(BrokerError::InvalidRequest(
                        "channel does not belong to caller".to_string(),
                    ));
                }
                if tx.has_challenged_channel(wallet)? {
                    return Err(BrokerError::ChallengedChannelExists);
                }
                if !matches!(
                    channel.status,
                    ChannelStatus::Open | ChannelStatus::Resizing
                ) {
                    return Err(BrokerError::ChannelNotOpen(
                        channel.status.as_str().to_string(),
                    ));
                }

                let (symbol, decimals) = assets
                    .by_token(channel.chain_id, channel.token)
                    .map(|(s, d)| (s.to_string(), d))
                    .ok_or_else(|| {
                        BrokerError::UnknownAsset(channel.token.to_checksum(None))
                    })?;

                let wallet_account = AccountId::from_wallet(wallet);
                let channel_account = AccountId::new(channel.channel_id.clone());
                let unified = tx.balance(&wallet_account, &wallet_account, &symbol)?;
                let escrow = tx.balance(&wallet_account, &channel_account, &symbol)?;
                let available_raw = units::to_raw_units_floor(&(unified + escrow), decimals)?;

                // The user can never take more than the channel holds.
                let user_allocation = available_raw.min(channel.raw_amount.clone());
                let broker_allocation = &channel.raw_amount - &user_allocation;

                let destination = funds_destination.unwrap_or(wallet);
                let final_state = UnsignedState {
                    intent: StateIntent::Finalize,
                    version: channel.state.version + 1,
                    data: Vec::new(),
                    allocations: vec![
                        Allocation {
                            participant: destination,
                            token_address: channel.token,
                            raw_amount: user_allocation,
                        },
                        Allocation {
                            participant: broker_address,
                            token_address: channel.token,
                            raw_amount: broker_allocation,
                        },
                    ],
                };
                let channel_id = state::parse_channel_id(&channel.channel_id)?;
                let signature = state::sign_state(&signer, channel_id, &final_state)?;

                // Status stays as-is: only the Closed event closes the
                // channel.
                channel.state = final_state.clone();
                channel.server_sig = Some(signature.clone());
                channel.user_sig = None;
                tx.update_channel(&channel)?;

                Ok((channel, final_state, signature))
            })
            .await?;

        let view = self.channel_view(&channel);
        self.notifier().channel_update(wallet, &view).await;

        Ok(ChannelOperationResult {
            channel_id: channel.channel_id.clone(),
            state: self.state_view(&final_state),
            state_signature: signature.to_hex(),
            channel: Some(view),
        })
    }
}
