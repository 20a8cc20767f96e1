//! Durable queue of outbound on-chain operations.

use rusqlite::{params, OptionalExtension, Row};

use clearhouse_common::time::get_current_time_in_millis;

use super::StoreTx;
use crate::core::{
    error::BrokerError,
    model::{ActionStatus, BlockchainAction},
};

fn action_from_row(row: &Row<'_>) -> Result<BlockchainAction, rusqlite::Error> {
    let status_raw: String = row.get(5)?;
    Ok(BlockchainAction {
        id: row.get(0)?,
        action_type: row.get(1)?,
        channel_id: row.get(2)?,
        chain_id: row.get(3)?,
        data: row.get(4)?,
        status: ActionStatus::parse(&status_raw).ok_or(rusqlite::Error::InvalidQuery)?,
        retries: row.get(6)?,
        error: row.get(7)?,
        tx_hash: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const ACTION_COLUMNS: &str =
    "id, action_type, channel_id, chain_id, data, status, retries, error, tx_hash, created_at, updated_at";

impl StoreTx<'_> {
    pub fn enqueue_action(
        &self,
        action_type: &str,
        channel_id: &str,
        chain_id: u64,
        data: &str,
    ) -> Result<u64, BrokerError> {
        let now = get_current_time_in_millis();
        self.tx.execute(
            "INSERT INTO blockchain_actions (action_type, channel_id, chain_id, data, status, retries, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
            params![
                action_type,
                channel_id,
                chain_id,
                data,
                ActionStatus::Pending.as_str(),
                now
            ],
        )?;
        Ok(self.tx.last_insert_rowid() as u64)
    }

    /// Oldest pending actions for one chain, bounded batch.
    pub fn pending_actions(
        &self,
        chain_id: u64,
        limit: usize,
    ) -> Result<Vec<BlockchainAction>, BrokerError> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {} FROM blockchain_actions WHERE chain_id = ?1 AND status = ?2 \
             ORDER BY created_at ASC, id ASC LIMIT {}",
            ACTION_COLUMNS, limit
        ))?;
        let rows = stmt.query_map(
            params![chain_id, ActionStatus::Pending.as_str()],
            action_from_row,
        )?;
        let mut actions = Vec::new();
        for row in rows {
            actions.push(row?);
        }
        Ok(actions)
    }

    pub fn get_action(&self, id: u64) -> Result<Option<BlockchainAction>, BrokerError> {
        let action = self
            .tx
            .query_row(
                &format!("SELECT {} FROM blockchain_actions WHERE id = ?1", ACTION_COLUMNS),
                params![id],
                action_from_row,
            )
            .optional()?;
        Ok(action)
    }

    pub fn complete_action(&self, id: u64, tx_hash: &str) -> Result<(), BrokerError> {
        self.tx.execute(
            "UPDATE blockchain_actions SET status = ?2, tx_hash = ?3, error = NULL, updated_at = ?4 WHERE id = ?1",
            params![
                id,
                ActionStatus::Completed.as_str(),
                tx_hash,
                get_current_time_in_millis()
            ],
        )?;
        Ok(())
    }

    pub fn fail_action(&self, id: u64, error: &str) -> Result<(), BrokerError> {
        self.tx.execute(
            "UPDATE blockchain_actions SET status = ?2, error = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                id,
                ActionStatus::Failed.as_str(),
                error,
                get_current_time_in_millis()
            ],
        )?;
        Ok(())
    }

    /// Keep the action pending but remember the failure.
    pub fn record_action_retry(&self, id: u64, error: &str) -> Result<(), BrokerError> {
        self.tx.execute(
            "UPDATE blockchain_actions SET retries = retries + 1, error = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, error, get_current_time_in_millis()],
        )?;
        Ok(())
    }
}
