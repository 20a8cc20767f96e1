//! Delegated session keys with per-asset spending caps.

use std::str::FromStr;

use alloy_primitives::Address;
use rusqlite::{params, OptionalExtension, Row};

use clearhouse_common::time::TimestampSeconds;

use super::StoreTx;
use crate::core::{error::BrokerError, model::SessionKey};

fn session_key_from_row(row: &Row<'_>) -> Result<SessionKey, rusqlite::Error> {
    let allowances_raw: String = row.get(4)?;
    Ok(SessionKey {
        address: Address::from_str(&row.get::<_, String>(0)?)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        wallet: Address::from_str(&row.get::<_, String>(1)?)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        application: row.get(2)?,
        scope: row.get(3)?,
        allowances: serde_json::from_str(&allowances_raw)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        expires_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const SESSION_KEY_COLUMNS: &str =
    "address, wallet_address, application, scope, allowances, expires_at, created_at";

impl StoreTx<'_> {
    /// Persist a session key. One active key per (wallet, application):
    /// callers expire the previous one in the same transaction.
    pub fn upsert_session_key(&self, key: &SessionKey) -> Result<(), BrokerError> {
        self.tx.execute(
            "INSERT OR REPLACE INTO session_keys (address, wallet_address, application, scope, allowances, expires_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key.address.to_checksum(None),
                key.wallet.to_checksum(None),
                key.application,
                key.scope,
                serde_json::to_string(&key.allowances)?,
                key.expires_at,
                key.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_session_key(&self, address: Address) -> Result<Option<SessionKey>, BrokerError> {
        let key = self
            .tx
            .query_row(
                &format!(
                    "SELECT {} FROM session_keys WHERE address = ?1",
                    SESSION_KEY_COLUMNS
                ),
                params![address.to_checksum(None)],
                session_key_from_row,
            )
            .optional()?;
        Ok(key)
    }

    pub fn active_session_keys(
        &self,
        wallet: Address,
        now: TimestampSeconds,
    ) -> Result<Vec<SessionKey>, BrokerError> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {} FROM session_keys WHERE wallet_address = ?1 AND expires_at > ?2 ORDER BY created_at DESC",
            SESSION_KEY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![wallet.to_checksum(None), now], session_key_from_row)?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    /// Invalidate any live key of this (wallet, application) pair.
    pub fn expire_session_keys(
        &self,
        wallet: Address,
        application: &str,
        now: TimestampSeconds,
    ) -> Result<usize, BrokerError> {
        let expired = self.tx.execute(
            "UPDATE session_keys SET expires_at = ?3 WHERE wallet_address = ?1 AND application = ?2 AND expires_at > ?3",
            params![wallet.to_checksum(None), application, now],
        )?;
        Ok(expired)
    }

    pub fn revoke_session_key(
        &self,
        address: Address,
        now: TimestampSeconds,
    ) -> Result<bool, BrokerError> {
        let revoked = self.tx.execute(
            "UPDATE session_keys SET expires_at = ?2 WHERE address = ?1 AND expires_at > ?2",
            params![address.to_checksum(None), now],
        )?;
        Ok(revoked > 0)
    }
}
