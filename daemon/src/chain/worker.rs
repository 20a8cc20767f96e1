//! Durable outbound action worker: one task per chain drains the pending
//! queue on a fixed tick, lands checkpoints through the custody client and
//! classifies failures as poison (no retry) or transient (bounded retries).

use std::{sync::Arc, time::Duration};

use metrics::counter;
use tokio::sync::watch;

use crate::{
    config::{ACTION_BATCH_SIZE, ACTION_WORKER_TICK_SECS, MAX_ACTION_RETRIES},
    core::{
        broker::Broker,
        error::BrokerError,
        model::{BlockchainAction, CheckpointData, ACTION_TYPE_CHECKPOINT},
    },
};

use super::client::ChainClient;

pub struct ActionWorker {
    broker: Arc<Broker>,
    chain_id: u64,
    client: Arc<dyn ChainClient>,
}

impl ActionWorker {
    pub fn new(broker: Arc<Broker>, chain_id: u64, client: Arc<dyn ChainClient>) -> Self {
        Self {
            broker,
            chain_id,
            client,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Blockchain action worker for chain {} started", self.chain_id);
        let mut ticker = tokio::time::interval(Duration::from_secs(ACTION_WORKER_TICK_SECS));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.process_batch().await {
                        error!("chain {}: action batch failed: {}", self.chain_id, e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("Blockchain action worker for chain {} stopping", self.chain_id);
                    break;
                }
            }
        }
    }

    /// Pull the oldest pending actions for this chain and process each.
    pub async fn process_batch(&self) -> Result<usize, BrokerError> {
        let chain_id = self.chain_id;
        let batch = self
            .broker
            .store()
            .transaction(move |tx| tx.pending_actions(chain_id, ACTION_BATCH_SIZE))
            .await?;
        let count = batch.len();
        for action in batch {
            self.process_action(action).await?;
        }
        Ok(count)
    }

    async fn process_action(&self, action: BlockchainAction) -> Result<(), BrokerError> {
        debug!(
            "chain {}: processing action {} ({} retries so far)",
            self.chain_id, action.id, action.retries
        );
        let outcome = self.execute(&action).await;
        let action_id = action.id;
        match outcome {
            Ok(tx_hash) => {
                counter!("clearhouse_actions_completed").increment(1);
                info!(
                    "chain {}: action {} completed with tx {}",
                    self.chain_id, action_id, tx_hash
                );
                self.broker
                    .store()
                    .transaction(move |tx| tx.complete_action(action_id, &tx_hash))
                    .await
            }
            Err(e) if is_fatal(&e) => {
                counter!("clearhouse_actions_failed").increment(1);
                error!(
                    "chain {}: action {} is poisoned: {}",
                    self.chain_id, action_id, e
                );
                let message = format!("{:#}", e);
                self.broker
                    .store()
                    .transaction(move |tx| tx.fail_action(action_id, &message))
                    .await
            }
            Err(e) => {
                if action.retries < MAX_ACTION_RETRIES {
                    warn!(
                        "chain {}: action {} failed (attempt {}): {}",
                        self.chain_id,
                        action_id,
                        action.retries + 1,
                        e
                    );
                    let message = format!("{:#}", e);
                    self.broker
                        .store()
                        .transaction(move |tx| tx.record_action_retry(action_id, &message))
                        .await
                } else {
                    counter!("clearhouse_actions_failed").increment(1);
                    let message =
                        format!("failed after {} retries: {:#}", action.retries, e);
                    error!("chain {}: action {} {}", self.chain_id, action_id, message);
                    self.broker
                        .store()
                        .transaction(move |tx| tx.fail_action(action_id, &message))
                        .await
                }
            }
        }
    }

    async fn execute(&self, action: &BlockchainAction) -> Result<String, BrokerError> {
        match action.action_type.as_str() {
            ACTION_TYPE_CHECKPOINT => {
                let data: CheckpointData = serde_json::from_str(&action.data)
                    .map_err(|e| BrokerError::CorruptActionData(e.to_string()))?;
                self.client.checkpoint(&data).await
            }
            other => Err(BrokerError::CorruptActionData(format!(
                "unknown action type {}",
                other
            ))),
        }
    }
}

/// Poison records: undecodable payloads can never succeed, so they fail
/// immediately instead of burning retries.
fn is_fatal(error: &BrokerError) -> bool {
    matches!(error, BrokerError::CorruptActionData(_))
}
