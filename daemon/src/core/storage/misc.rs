//! User tags and the RPC request journal.

use std::str::FromStr;

use alloy_primitives::{keccak256, Address};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use clearhouse_common::{
    api::ledger::RpcHistoryEntry,
    crypto::RpcSignature,
    rpc::RpcPayload,
    time::get_current_time_in_millis,
};

use super::StoreTx;
use crate::core::error::BrokerError;

/// Short human-shareable tag derived from the wallet address. Stable across
/// calls, assigned on first access.
fn derive_tag(wallet: Address) -> String {
    let mut preimage = Vec::with_capacity(28);
    preimage.extend_from_slice(wallet.as_slice());
    preimage.extend_from_slice(b"user-tag");
    let digest = keccak256(&preimage);
    hex::encode(&digest[..4]).to_uppercase()
}

impl StoreTx<'_> {
    pub fn get_or_create_user_tag(&self, wallet: Address) -> Result<String, BrokerError> {
        let existing: Option<String> = self
            .tx
            .query_row(
                "SELECT tag FROM user_tags WHERE wallet = ?1",
                params![wallet.to_checksum(None)],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(tag) = existing {
            return Ok(tag);
        }
        let tag = derive_tag(wallet);
        self.tx.execute(
            "INSERT INTO user_tags (wallet, tag, created_at) VALUES (?1, ?2, ?3)",
            params![
                wallet.to_checksum(None),
                tag,
                get_current_time_in_millis()
            ],
        )?;
        Ok(tag)
    }

    pub fn wallet_by_tag(&self, tag: &str) -> Result<Option<Address>, BrokerError> {
        let wallet: Option<String> = self
            .tx
            .query_row(
                "SELECT wallet FROM user_tags WHERE tag = ?1",
                params![tag],
                |row| row.get(0),
            )
            .optional()?;
        Ok(wallet.and_then(|w| Address::from_str(&w).ok()))
    }

    /// Journal one processed request with its response.
    pub fn insert_rpc_record(
        &self,
        sender: Address,
        payload: &RpcPayload,
        signatures: &[RpcSignature],
        response: &Value,
    ) -> Result<(), BrokerError> {
        self.tx.execute(
            "INSERT INTO rpc_records (sender, req_id, method, params, timestamp, signatures, response, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                sender.to_checksum(None),
                payload.request_id,
                payload.method,
                serde_json::to_string(&payload.params)?,
                payload.timestamp,
                serde_json::to_string(signatures)?,
                serde_json::to_string(response)?,
                get_current_time_in_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn list_rpc_records(
        &self,
        sender: Address,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<RpcHistoryEntry>, BrokerError> {
        let mut stmt = self.tx.prepare(
            "SELECT id, sender, req_id, method, params, timestamp, signatures, response \
             FROM rpc_records WHERE sender = ?1 ORDER BY id DESC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![sender.to_checksum(None), limit, offset], |row| {
            let sender_raw: String = row.get(1)?;
            let params_raw: String = row.get(4)?;
            let signatures_raw: String = row.get(6)?;
            let response_raw: String = row.get(7)?;
            Ok(RpcHistoryEntry {
                id: row.get(0)?,
                sender: Address::from_str(&sender_raw).map_err(|_| rusqlite::Error::InvalidQuery)?,
                req_id: row.get(2)?,
                method: row.get(3)?,
                params: serde_json::from_str(&params_raw)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                timestamp: row.get(5)?,
                signatures: serde_json::from_str(&signatures_raw)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                response: serde_json::from_str(&response_raw)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::Store;
    use serde_json::json;

    #[tokio::test]
    async fn tag_is_stable_and_reversible() {
        let store = Store::in_memory().unwrap();
        let wallet = Address::repeat_byte(0x42);
        let first = store
            .transaction(|tx| tx.get_or_create_user_tag(wallet))
            .await
            .unwrap();
        let second = store
            .transaction(|tx| tx.get_or_create_user_tag(wallet))
            .await
            .unwrap();
        assert_eq!(first, second);

        let resolved = store
            .transaction(|tx| tx.wallet_by_tag(&first))
            .await
            .unwrap();
        assert_eq!(resolved, Some(wallet));
    }

    #[tokio::test]
    async fn rpc_history_lists_latest_first() {
        let store = Store::in_memory().unwrap();
        let sender = Address::repeat_byte(0x07);
        store
            .transaction(|tx| {
                for i in 0..3u64 {
                    let payload = RpcPayload::new(i, "transfer", json!({"i": i}), i);
                    tx.insert_rpc_record(sender, &payload, &[], &json!({"ok": true}))?;
                }
                Ok(())
            })
            .await
            .unwrap();

        let records = store
            .transaction(|tx| tx.list_rpc_records(sender, 2, 0))
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].req_id, 2);
        assert_eq!(records[1].req_id, 1);
    }
}
