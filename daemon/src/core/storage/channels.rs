//! Channel rows and status queries.

use std::str::FromStr;

use alloy_primitives::Address;
use bigdecimal::num_bigint::BigInt;
use rusqlite::{params, OptionalExtension, Row};

use clearhouse_common::{
    api::channel::ChannelStatus, crypto::RpcSignature, time::get_current_time_in_millis,
};

use super::StoreTx;
use crate::core::{
    error::BrokerError,
    model::{Channel, UnsignedState},
};

fn address_column(raw: &str) -> Result<Address, rusqlite::Error> {
    Address::from_str(raw).map_err(|_| rusqlite::Error::InvalidQuery)
}

fn channel_from_row(row: &Row<'_>) -> Result<Channel, rusqlite::Error> {
    let status_raw: String = row.get(6)?;
    let state_raw: String = row.get(10)?;
    let server_sig: Option<String> = row.get(11)?;
    let user_sig: Option<String> = row.get(12)?;
    let state: UnsignedState =
        serde_json::from_str(&state_raw).map_err(|_| rusqlite::Error::InvalidQuery)?;
    Ok(Channel {
        channel_id: row.get(0)?,
        chain_id: row.get(1)?,
        token: address_column(&row.get::<_, String>(2)?)?,
        wallet: address_column(&row.get::<_, String>(3)?)?,
        participant_signer: address_column(&row.get::<_, String>(4)?)?,
        raw_amount: row
            .get::<_, String>(5)?
            .parse::<BigInt>()
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        status: ChannelStatus::parse(&status_raw).ok_or(rusqlite::Error::InvalidQuery)?,
        challenge: row.get(7)?,
        nonce: row.get(8)?,
        adjudicator: address_column(&row.get::<_, String>(9)?)?,
        state,
        server_sig: server_sig.and_then(|s| RpcSignature::from_hex(&s).ok()),
        user_sig: user_sig.and_then(|s| RpcSignature::from_hex(&s).ok()),
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

const CHANNEL_COLUMNS: &str = "channel_id, chain_id, token, wallet, participant_signer, raw_amount, \
     status, challenge, nonce, adjudicator, state, server_sig, user_sig, created_at, updated_at";

impl StoreTx<'_> {
    pub fn insert_channel(&self, channel: &Channel) -> Result<(), BrokerError> {
        let state = serde_json::to_string(&channel.state)?;
        self.tx.execute(
            "INSERT INTO channels (channel_id, chain_id, token, wallet, participant_signer, raw_amount, \
             status, challenge, nonce, adjudicator, state, server_sig, user_sig, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                channel.channel_id,
                channel.chain_id,
                channel.token.to_checksum(None),
                channel.wallet.to_checksum(None),
                channel.participant_signer.to_checksum(None),
                channel.raw_amount.to_str_radix(10),
                channel.status.as_str(),
                channel.challenge,
                channel.nonce,
                channel.adjudicator.to_checksum(None),
                state,
                channel.server_sig.as_ref().map(|s| s.to_hex()),
                channel.user_sig.as_ref().map(|s| s.to_hex()),
                channel.created_at,
                channel.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Persist mutable channel fields; `updated_at` is refreshed here.
    pub fn update_channel(&self, channel: &Channel) -> Result<(), BrokerError> {
        let state = serde_json::to_string(&channel.state)?;
        let updated = self.tx.execute(
            "UPDATE channels SET raw_amount = ?2, status = ?3, state = ?4, server_sig = ?5, \
             user_sig = ?6, updated_at = ?7 WHERE channel_id = ?1",
            params![
                channel.channel_id,
                channel.raw_amount.to_str_radix(10),
                channel.status.as_str(),
                state,
                channel.server_sig.as_ref().map(|s| s.to_hex()),
                channel.user_sig.as_ref().map(|s| s.to_hex()),
                get_current_time_in_millis(),
            ],
        )?;
        if updated == 0 {
            return Err(BrokerError::ChannelNotFound(channel.channel_id.clone()));
        }
        Ok(())
    }

    pub fn get_channel(&self, channel_id: &str) -> Result<Option<Channel>, BrokerError> {
        let channel = self
            .tx
            .query_row(
                &format!("SELECT {} FROM channels WHERE channel_id = ?1", CHANNEL_COLUMNS),
                params![channel_id],
                channel_from_row,
            )
            .optional()?;
        Ok(channel)
    }

    /// The per-wallet gate: any channel sitting in `challenged` blocks new
    /// off-chain operations for that wallet.
    pub fn has_challenged_channel(&self, wallet: Address) -> Result<bool, BrokerError> {
        let count: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM channels WHERE wallet = ?1 AND status = ?2",
            params![wallet.to_checksum(None), ChannelStatus::Challenged.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn find_open_channel(
        &self,
        wallet: Address,
        token: Address,
        chain_id: u64,
    ) -> Result<Option<Channel>, BrokerError> {
        let channel = self
            .tx
            .query_row(
                &format!(
                    "SELECT {} FROM channels WHERE wallet = ?1 AND token = ?2 AND chain_id = ?3 AND status = ?4",
                    CHANNEL_COLUMNS
                ),
                params![
                    wallet.to_checksum(None),
                    token.to_checksum(None),
                    chain_id,
                    ChannelStatus::Open.as_str()
                ],
                channel_from_row,
            )
            .optional()?;
        Ok(channel)
    }

    pub fn list_channels(
        &self,
        wallet: Option<Address>,
        status: Option<ChannelStatus>,
    ) -> Result<Vec<Channel>, BrokerError> {
        let mut sql = format!("SELECT {} FROM channels WHERE 1=1", CHANNEL_COLUMNS);
        let mut args: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(wallet) = wallet {
            sql.push_str(&format!(" AND wallet = ?{}", args.len() + 1));
            args.push(rusqlite::types::Value::Text(wallet.to_checksum(None)));
        }
        if let Some(status) = status {
            sql.push_str(&format!(" AND status = ?{}", args.len() + 1));
            args.push(rusqlite::types::Value::Text(status.as_str().to_string()));
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), channel_from_row)?;
        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{model::Allocation, storage::Store};
    use clearhouse_common::api::channel::StateIntent;

    fn sample_channel(id: &str, wallet: Address, status: ChannelStatus) -> Channel {
        Channel {
            channel_id: id.to_string(),
            chain_id: 137,
            token: Address::repeat_byte(0x10),
            wallet,
            participant_signer: wallet,
            raw_amount: BigInt::from(1000),
            status,
            challenge: 3600,
            nonce: 7,
            adjudicator: Address::repeat_byte(0x20),
            state: UnsignedState {
                intent: StateIntent::Initialize,
                version: 0,
                data: Vec::new(),
                allocations: vec![Allocation {
                    participant: wallet,
                    token_address: Address::repeat_byte(0x10),
                    raw_amount: BigInt::from(0),
                }],
            },
            server_sig: None,
            user_sig: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_round_trip() {
        let store = Store::in_memory().unwrap();
        let wallet = Address::repeat_byte(0x01);
        let channel = sample_channel("0xabc", wallet, ChannelStatus::Open);
        store
            .transaction(|tx| tx.insert_channel(&channel))
            .await
            .unwrap();

        let fetched = store
            .transaction(|tx| tx.get_channel("0xabc"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.wallet, wallet);
        assert_eq!(fetched.raw_amount, BigInt::from(1000));
        assert_eq!(fetched.state.intent, StateIntent::Initialize);
    }

    #[tokio::test]
    async fn challenged_gate_detects_status() {
        let store = Store::in_memory().unwrap();
        let wallet = Address::repeat_byte(0x02);
        store
            .transaction(|tx| {
                tx.insert_channel(&sample_channel("0x1", wallet, ChannelStatus::Open))?;
                tx.insert_channel(&sample_channel("0x2", wallet, ChannelStatus::Challenged))
            })
            .await
            .unwrap();

        let challenged = store
            .transaction(|tx| tx.has_challenged_channel(wallet))
            .await
            .unwrap();
        assert!(challenged);
        let other = store
            .transaction(|tx| tx.has_challenged_channel(Address::repeat_byte(0x03)))
            .await
            .unwrap();
        assert!(!other);
    }

    #[tokio::test]
    async fn update_missing_channel_fails() {
        let store = Store::in_memory().unwrap();
        let channel = sample_channel("0xmissing", Address::repeat_byte(0x04), ChannelStatus::Open);
        let result = store.transaction(|tx| tx.update_channel(&channel)).await;
        assert!(matches!(result, Err(BrokerError::ChannelNotFound(_))));
    }
}
