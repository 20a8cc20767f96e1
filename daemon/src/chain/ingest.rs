//! Per-chain custody log ingestion.
//!
//! The poller walks the chain in `block_step` windows, strictly in
//! `(block_number, log_index)` order, and applies each log inside one
//! storage transaction whose first write is the `contract_events`
//! idempotency row. Crashing between fetch and commit replays cleanly; a
//! committed log can never apply twice.

use std::{str::FromStr, sync::Arc, time::Duration};

use alloy_primitives::Address;
use bigdecimal::num_bigint::{BigInt, Sign};
use metrics::counter;
use tokio::sync::watch;

use clearhouse_common::{
    account::{AccountId, AccountType},
    api::channel::{ChannelStatus, StateIntent},
    time::get_current_time_in_millis,
    units,
};

use crate::{
    config::{ChainConfig, MIN_CHANNEL_CHALLENGE_SECS},
    core::{
        broker::Broker,
        error::BrokerError,
        model::{
            Allocation, Channel, CheckpointData, ContractEvent, TransactionType, UnsignedState,
            ACTION_TYPE_CHECKPOINT,
        },
    },
};

use super::{
    client::{ChainClient, ChainLog},
    events::{self, CustodyEvent},
};

fn u256_to_bigint(value: &alloy_primitives::U256) -> BigInt {
    // U256 displays as decimal; the round-trip is exact.
    BigInt::from_str(&value.to_string()).expect("u256 decimal form parses")
}

fn i256_to_bigint(value: &alloy_primitives::I256) -> BigInt {
    BigInt::from_str(&value.to_string()).expect("i256 decimal form parses")
}

pub struct EventIngestor {
    broker: Arc<Broker>,
    chain: ChainConfig,
    client: Arc<dyn ChainClient>,
}

impl EventIngestor {
    pub fn new(broker: Arc<Broker>, chain: ChainConfig, client: Arc<dyn ChainClient>) -> Self {
        Self {
            broker,
            chain,
            client,
        }
    }

    /// Resume after the highest applied block, or at the configured start.
    pub async fn resume_cursor(&self) -> Result<u64, BrokerError> {
        let chain_id = self.chain.id;
        let last = self
            .broker
            .store()
            .transaction(move |tx| tx.last_event_block(chain_id))
            .await?;
        Ok(last.unwrap_or(self.chain.start_block))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut cursor = match self.resume_cursor().await {
            Ok(cursor) => cursor,
            Err(e) => {
                error!("chain {}: cannot resume event cursor: {}", self.chain.id, e);
                return;
            }
        };
        info!(
            "Event listener for chain {} starting at block {}",
            self.chain.id, cursor
        );
        let interval = Duration::from_secs(self.chain.poll_interval_secs.max(1));
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.poll_round(&mut cursor).await {
                        warn!("chain {}: event poll failed: {}", self.chain.id, e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("Event listener for chain {} stopping", self.chain.id);
                    break;
                }
            }
        }
    }

    /// One polling pass: fetch windows up to the head and apply in order.
    pub async fn poll_round(&self, cursor: &mut u64) -> Result<(), BrokerError> {
        let head = self.client.head_block().await?;
        while *cursor < head {
            let from = *cursor + 1;
            let to = head.min(*cursor + self.chain.block_step);
            let mut logs = self
                .client
                .fetch_logs(self.chain.custody_address, from, to)
                .await?;
            logs.sort_by_key(|log| (log.block_number, log.log_index));
            for log in &logs {
                self.apply_log(log).await?;
            }
            *cursor = to;
        }
        Ok(())
    }

    /// Apply one log. Returns true when it produced ledger/channel effects,
    /// false for duplicates, foreign logs and rejected events.
    pub async fn apply_log(&self, log: &ChainLog) -> Result<bool, BrokerError> {
        let Some(event) = events::parse_event(&log.topics, &log.data)? else {
            return Ok(false);
        };
        let tx_hash = format!("{:#x}", log.tx_hash);
        let record = ContractEvent {
            chain_id: self.chain.id,
            contract_address: log.address,
            tx_hash: tx_hash.clone(),
            log_index: log.log_index,
            block_number: log.block_number,
        };

        let chain_id = self.chain.id;
        let log_index = log.log_index;
        let duplicate = self
            .broker
            .store()
            .transaction(move |tx| tx.has_contract_event(chain_id, &tx_hash, log_index))
            .await?;
        if duplicate {
            trace!(
                "chain {}: skipping already processed log {}:{}",
                self.chain.id,
                record.tx_hash,
                record.log_index
            );
            return Ok(false);
        }

        debug!(
            "chain {}: applying {} at block {} ({}:{})",
            self.chain.id,
            event.name(),
            log.block_number,
            record.tx_hash,
            record.log_index
        );
        counter!("clearhouse_contract_events").increment(1);

        match event {
            CustodyEvent::Created(created) => self.apply_created(record, created).await,
            CustodyEvent::Joined(joined) => self.apply_joined(record, joined).await,
            CustodyEvent::Resized(resized) => self.apply_resized(record, resized).await,
            CustodyEvent::Challenged(challenged) => {
                self.apply_challenged(record, challenged).await
            }
            CustodyEvent::Closed(closed) => self.apply_closed(record, closed).await,
        }
    }

    async fn notify_channel(&self, channel_id: &str, wallet: Address, with_balances: bool) {
        let channel_id_owned = channel_id.to_string();
        let channel = self
            .broker
            .store()
            .transaction(move |tx| tx.get_channel(&channel_id_owned))
            .await;
        if let Ok(Some(channel)) = channel {
            let view = self.broker.channel_view(&channel);
            self.broker.notifier().channel_update(wallet, &view).await;
        }
        if with_balances {
            if let Ok(balances) = self
                .broker
                .get_ledger_balances(&AccountId::from_wallet(wallet))
                .await
            {
                self.broker.notifier().balance_update(wallet, balances).await;
            }
        }
    }

    async fn apply_created(
        &self,
        record: ContractEvent,
        event: events::Created,
    ) -> Result<bool, BrokerError> {
        let broker_address = self.broker.address();
        if event.participants.len() != 2 || event.allocations.len() != 2 {
            warn!("Created {}: malformed participants", record.tx_hash);
            return Ok(false);
        }
        if event.participants[1] != broker_address {
            warn!("Created {}: broker is not participant[1]", record.tx_hash);
            return Ok(false);
        }
        if event.adjudicator != self.chain.adjudicator_address {
            warn!("Created {}: unknown adjudicator", record.tx_hash);
            return Ok(false);
        }
        if event.challenge < MIN_CHANNEL_CHALLENGE_SECS {
            warn!(
                "Created {}: challenge {} below minimum",
                record.tx_hash, event.challenge
            );
            return Ok(false);
        }
        if !event.allocations[1].is_zero() {
            warn!(
                "Created {}: broker initial allocation must be zero",
                record.tx_hash
            );
            return Ok(false);
        }
        let Some((symbol, decimals)) = self
            .broker
            .assets()
            .by_token(self.chain.id, event.token)
            .map(|(s, d)| (s.to_string(), d))
        else {
            warn!("Created {}: unsupported token {}", record.tx_hash, event.token);
            return Ok(false);
        };

        let wallet = event.participants[0];
        let amount_raw = u256_to_bigint(&event.allocations[0]);
        let amount = units::from_raw_units(&amount_raw, decimals);
        let channel_id = format!("{:#x}", event.channelId);
        let chain_id = self.chain.id;
        let token = event.token;
        let adjudicator = event.adjudicator;
        let challenge = event.challenge;
        let nonce = event.nonce;

        let applied = self
            .broker
            .store()
            .transaction(move |tx| {
                tx.insert_contract_event(&record)?;
                if tx.get_channel(&channel_id)?.is_some() {
                    return Ok(false);
                }

                let now = get_current_time_in_millis();
                let channel = Channel {
                    channel_id: channel_id.clone(),
                    chain_id,
                    token,
                    wallet,
                    participant_signer: wallet,
                    raw_amount: amount_raw.clone(),
                    status: ChannelStatus::Open,
                    challenge,
                    nonce,
                    adjudicator,
                    state: UnsignedState {
                        intent: StateIntent::Initialize,
                        version: 0,
                        data: Vec::new(),
                        allocations: vec![
                            Allocation {
                                participant: wallet,
                                token_address: token,
                                raw_amount: amount_raw.clone(),
                            },
                            Allocation {
                                participant: broker_address,
                                token_address: token,
                                raw_amount: BigInt::from(0),
                            },
                        ],
                    },
                    server_sig: None,
                    user_sig: None,
                    created_at: now,
                    updated_at: now,
                };
                tx.insert_channel(&channel)?;

                // Deposit flow: the channel account nets to zero and the
                // unified balance takes the credit.
                let wallet_account = AccountId::from_wallet(wallet);
                let channel_account = AccountId::new(channel_id.clone());
                tx.record(
                    &channel_account,
                    AccountType::Channel,
                    &symbol,
                    &wallet_account,
                    &amount,
                    None,
                )?;
                tx.record(
                    &channel_account,
                    AccountType::Channel,
                    &symbol,
                    &wallet_account,
                    &(-&amount),
                    None,
                )?;
                tx.record(
                    &wallet_account,
                    AccountType::Wallet,
                    &symbol,
                    &wallet_account,
                    &amount,
                    None,
                )?;
                tx.record_transaction(
                    TransactionType::Deposit,
                    &channel_account,
                    &wallet_account,
                    &symbol,
                    &amount,
                )?;
                Ok(true)
            })
            .await?;

        if applied {
            counter!("clearhouse_channels_created").increment(1);
            self.notify_channel(&format!("{:#x}", event.channelId), wallet, true)
                .await;
        }
        Ok(applied)
    }

    async fn apply_joined(
        &self,
        record: ContractEvent,
        event: events::Joined,
    ) -> Result<bool, BrokerError> {
        // Join carries no ledger effect; the row is recorded so the log is
        // never revisited.
        debug!(
            "Joined {} index {} on chain {}",
            format!("{:#x}", event.channelId),
            event.index,
            record.chain_id
        );
        self.broker
            .store()
            .transaction(move |tx| {
                tx.insert_contract_event(&record)?;
                Ok(true)
            })
            .await
    }

    async fn apply_resized(
        &self,
        record: ContractEvent,
        event: events::Resized,
    ) -> Result<bool, BrokerError> {
        let channel_id = format!("{:#x}", event.channelId);
        let deltas: Vec<BigInt> = event.deltas.iter().map(i256_to_bigint).collect();
        let total: BigInt = deltas.iter().sum();
        let participant_delta = deltas.first().cloned().unwrap_or_else(|| BigInt::from(0));

        let assets = self.broker.assets().clone();
        let chain_id = self.chain.id;

        let applied = self
            .broker
            .store()
            .transaction(move |tx| {
                tx.insert_contract_event(&record)?;
                let Some(mut channel) = tx.get_channel(&channel_id)? else {
                    warn!("Resized {}: unknown channel", channel_id);
                    return Ok(None);
                };
                let Some((symbol, decimals)) = assets
                    .by_token(chain_id, channel.token)
                    .map(|(s, d)| (s.to_string(), d))
                else {
                    warn!("Resized {}: unsupported token", channel_id);
                    return Ok(None);
                };

                let new_raw = &channel.raw_amount + &total;
                if new_raw.sign() == Sign::Minus {
                    warn!(
                        "Resized {}: deltas would leave negative funding",
                        channel_id
                    );
                    return Ok(None);
                }

                let wallet_account = AccountId::from_wallet(channel.wallet);
                let channel_account = AccountId::new(channel_id.clone());

                match participant_delta.sign() {
                    Sign::Plus => {
                        // Net deposit: mirror the Created credit flow.
                        let amount = units::from_raw_units(&participant_delta, decimals);
                        tx.record(
                            &channel_account,
                            AccountType::Channel,
                            &symbol,
                            &wallet_account,
                            &amount,
                            None,
                        )?;
                        tx.record(
                            &channel_account,
                            AccountType::Channel,
                            &symbol,
                            &wallet_account,
                            &(-&amount),
                            None,
                        )?;
                        tx.record(
                            &wallet_account,
                            AccountType::Wallet,
                            &symbol,
                            &wallet_account,
                            &amount,
                            None,
                        )?;
                        tx.record_transaction(
                            TransactionType::Deposit,
                            &channel_account,
                            &wallet_account,
                            &symbol,
                            &amount,
                        )?;
                    }
                    Sign::Minus => {
                        // Withdrawal confirmation: the escrow locked at
                        // request time leaves the ledger for the chain.
                        let amount = units::from_raw_units(&(-&participant_delta), decimals);
                        tx.record(
                            &channel_account,
                            AccountType::Channel,
                            &symbol,
                            &wallet_account,
                            &(-&amount),
                            None,
                        )?;
                        tx.record_transaction(
                            TransactionType::Withdrawal,
                            &channel_account,
                            &wallet_account,
                            &symbol,
                            &amount,
                        )?;
                    }
                    Sign::NoSign => {}
                }

                channel.raw_amount = new_raw;
                channel.status = ChannelStatus::Open;
                channel.state.version += 1;
                channel.server_sig = None;
                channel.user_sig = None;
                tx.update_channel(&channel)?;
                Ok(Some(channel.wallet))
            })
            .await?;

        if let Some(wallet) = applied {
            self.notify_channel(&format!("{:#x}", event.channelId), wallet, true)
                .await;
            return Ok(true);
        }
        Ok(false)
    }

    async fn apply_challenged(
        &self,
        record: ContractEvent,
        event: events::Challenged,
    ) -> Result<bool, BrokerError> {
        let channel_id = format!("{:#x}", event.channelId);
        let challenged_version = u64::try_from(event.version).unwrap_or(u64::MAX);
        let chain_id = self.chain.id;

        let applied = self
            .broker
            .store()
            .transaction(move |tx| {
                tx.insert_contract_event(&record)?;
                let Some(mut channel) = tx.get_channel(&channel_id)? else {
                    warn!("Challenged {}: unknown channel", channel_id);
                    return Ok(None);
                };

                if challenged_version < channel.state.version {
                    match (&channel.user_sig, &channel.server_sig) {
                        (Some(user_sig), Some(server_sig)) => {
                            let data = CheckpointData {
                                channel_id: channel_id.clone(),
                                state: channel.state.clone(),
                                user_sig: user_sig.clone(),
                                server_sig: server_sig.clone(),
                            };
                            let payload = serde_json::to_string(&data)?;
                            tx.enqueue_action(
                                ACTION_TYPE_CHECKPOINT,
                                &channel_id,
                                chain_id,
                                &payload,
                            )?;
                            info!(
                                "Challenged {}: enqueued checkpoint of version {}",
                                channel_id, channel.state.version
                            );
                        }
                        _ => {
                            warn!(
                                "Challenged {}: version {} is stale but signatures are missing",
                                channel_id, challenged_version
                            );
                        }
                    }
                }

                channel.status = ChannelStatus::Challenged;
                tx.update_channel(&channel)?;
                Ok(Some(channel.wallet))
            })
            .await?;

        if let Some(wallet) = applied {
            counter!("clearhouse_channels_challenged").increment(1);
            self.notify_channel(&format!("{:#x}", event.channelId), wallet, false)
                .await;
            return Ok(true);
        }
        Ok(false)
    }

    async fn apply_closed(
        &self,
        record: ContractEvent,
        event: events::Closed,
    ) -> Result<bool, BrokerError> {
        let channel_id = format!("{:#x}", event.channelId);
        let user_allocation_raw = event
            .finalAllocations
            .first()
            .map(u256_to_bigint)
            .unwrap_or_else(|| BigInt::from(0));
        let assets = self.broker.assets().clone();
        let chain_id = self.chain.id;

        let applied = self
            .broker
            .store()
            .transaction(move |tx| {
                tx.insert_contract_event(&record)?;
                let Some(mut channel) = tx.get_channel(&channel_id)? else {
                    warn!("Closed {}: unknown channel", channel_id);
                    return Ok(None);
                };
                let Some((symbol, decimals)) = assets
                    .by_token(chain_id, channel.token)
                    .map(|(s, d)| (s.to_string(), d))
                else {
                    warn!("Closed {}: unsupported token", channel_id);
                    return Ok(None);
                };

                let wallet_account = AccountId::from_wallet(channel.wallet);
                let channel_account = AccountId::new(channel_id.clone());

                // Residual escrow flows back to the unified balance first.
                let escrow = tx.balance(&wallet_account, &channel_account, &symbol)?;
                if units::is_positive(&escrow) {
                    tx.record(
                        &channel_account,
                        AccountType::Channel,
                        &symbol,
                        &wallet_account,
                        &(-&escrow),
                        None,
                    )?;
                    tx.record(
                        &wallet_account,
                        AccountType::Wallet,
                        &symbol,
                        &wallet_account,
                        &escrow,
                        None,
                    )?;
                    tx.record_transaction(
                        TransactionType::EscrowUnlock,
                        &channel_account,
                        &wallet_account,
                        &symbol,
                        &escrow,
                    )?;
                }

                // The finalized user allocation leaves for the chain.
                let user_allocation = units::from_raw_units(&user_allocation_raw, decimals);
                if units::is_positive(&user_allocation) {
                    tx.record(
                        &wallet_account,
                        AccountType::Wallet,
                        &symbol,
                        &wallet_account,
                        &(-&user_allocation),
                        None,
                    )?;
                    tx.record_transaction(
                        TransactionType::Withdrawal,
                        &wallet_account,
                        &channel_account,
                        &symbol,
                        &user_allocation,
                    )?;
                }

                channel.raw_amount = BigInt::from(0);
                channel.status = ChannelStatus::Closed;
                tx.update_channel(&channel)?;
                Ok(Some(channel.wallet))
            })
            .await?;

        if let Some(wallet) = applied {
            counter!("clearhouse_channels_closed").increment(1);
            self.notify_channel(&format!("{:#x}", event.channelId), wallet, true)
                .await;
            return Ok(true);
        }
        Ok(false)
    }
}
