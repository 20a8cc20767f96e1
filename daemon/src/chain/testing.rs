//! Test doubles for the chain boundary, shared by unit and integration
//! tests.

use std::sync::atomic::{AtomicBool, Ordering};

use alloy_primitives::Address;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::{error::BrokerError, model::CheckpointData};

use super::client::{ChainClient, ChainLog};

/// In-memory chain: push logs, observe checkpoint calls, inject failures.
#[derive(Default)]
pub struct MockChainClient {
    logs: Mutex<Vec<ChainLog>>,
    head: Mutex<u64>,
    pub checkpoints: Mutex<Vec<CheckpointData>>,
    fail_checkpoint: AtomicBool,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_log(&self, log: ChainLog) {
        let mut head = self.head.lock().await;
        if log.block_number > *head {
            *head = log.block_number;
        }
        self.logs.lock().await.push(log);
    }

    pub async fn set_head(&self, block: u64) {
        *self.head.lock().await = block;
    }

    pub fn fail_checkpoints(&self, fail: bool) {
        self.fail_checkpoint.store(fail, Ordering::SeqCst);
    }

    pub async fn checkpoint_count(&self) -> usize {
        self.checkpoints.lock().await.len()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn head_block(&self) -> Result<u64, BrokerError> {
        Ok(*self.head.lock().await)
    }

    async fn fetch_logs(
        &self,
        contract: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ChainLog>, BrokerError> {
        Ok(self
            .logs
            .lock()
            .await
            .iter()
            .filter(|log| {
                log.address == contract
                    && log.block_number >= from_block
                    && log.block_number <= to_block
            })
            .cloned()
            .collect())
    }

    async fn checkpoint(&self, data: &CheckpointData) -> Result<String, BrokerError> {
        if self.fail_checkpoint.load(Ordering::SeqCst) {
            return Err(BrokerError::ChainClient("rpc node down".to_string()));
        }
        let mut checkpoints = self.checkpoints.lock().await;
        checkpoints.push(data.clone());
        Ok(format!("0xcheckpoint{}", checkpoints.len()))
    }
}
