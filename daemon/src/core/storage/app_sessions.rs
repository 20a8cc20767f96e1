//! App-session rows.

use std::str::FromStr;

use alloy_primitives::Address;
use rusqlite::{params, OptionalExtension, Row};

use clearhouse_common::{
    api::app_session::AppSessionStatus, time::get_current_time_in_millis,
};

use super::StoreTx;
use crate::core::{error::BrokerError, model::AppSession};

fn session_from_row(row: &Row<'_>) -> Result<AppSession, rusqlite::Error> {
    let participants_raw: String = row.get(1)?;
    let weights_raw: String = row.get(2)?;
    let status_raw: String = row.get(8)?;
    let participants: Vec<String> =
        serde_json::from_str(&participants_raw).map_err(|_| rusqlite::Error::InvalidQuery)?;
    let participants = participants
        .iter()
        .map(|p| Address::from_str(p).map_err(|_| rusqlite::Error::InvalidQuery))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AppSession {
        session_id: row.get(0)?,
        participants,
        weights: serde_json::from_str(&weights_raw).map_err(|_| rusqlite::Error::InvalidQuery)?,
        quorum: row.get(3)?,
        challenge: row.get(4)?,
        nonce: row.get(5)?,
        protocol: row.get(6)?,
        session_data: row.get(7)?,
        status: AppSessionStatus::parse(&status_raw).ok_or(rusqlite::Error::InvalidQuery)?,
        version: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

const SESSION_COLUMNS: &str = "session_id, participants, weights, quorum, challenge, nonce, \
     protocol, session_data, status, version, created_at, updated_at";

impl StoreTx<'_> {
    pub fn insert_app_session(&self, session: &AppSession) -> Result<(), BrokerError> {
        let participants: Vec<String> = session
            .participants
            .iter()
            .map(|p| p.to_checksum(None))
            .collect();
        self.tx.execute(
            "INSERT INTO app_sessions (session_id, participants, weights, quorum, challenge, nonce, \
             protocol, session_data, status, version, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                session.session_id,
                serde_json::to_string(&participants)?,
                serde_json::to_string(&session.weights)?,
                session.quorum,
                session.challenge,
                session.nonce,
                session.protocol,
                session.session_data,
                session.status.as_str(),
                session.version,
                session.created_at,
                session.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_app_session(&self, session_id: &str) -> Result<Option<AppSession>, BrokerError> {
        let session = self
            .tx
            .query_row(
                &format!(
                    "SELECT {} FROM app_sessions WHERE session_id = ?1",
                    SESSION_COLUMNS
                ),
                params![session_id],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    /// Bump version / state / status after a quorum-approved transition.
    pub fn update_app_session(
        &self,
        session_id: &str,
        version: u64,
        status: AppSessionStatus,
        session_data: Option<&str>,
    ) -> Result<(), BrokerError> {
        let updated = self.tx.execute(
            "UPDATE app_sessions SET version = ?2, status = ?3, \
             session_data = COALESCE(?4, session_data), updated_at = ?5 WHERE session_id = ?1",
            params![
                session_id,
                version,
                status.as_str(),
                session_data,
                get_current_time_in_millis(),
            ],
        )?;
        if updated == 0 {
            return Err(BrokerError::AppSessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    pub fn list_app_sessions(
        &self,
        participant: Option<Address>,
        status: Option<AppSessionStatus>,
    ) -> Result<Vec<AppSession>, BrokerError> {
        let mut sql = format!("SELECT {} FROM app_sessions WHERE 1=1", SESSION_COLUMNS);
        if status.is_some() {
            sql.push_str(" AND status = ?1");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut stmt = self.tx.prepare(&sql)?;
        let rows: Vec<Result<AppSession, rusqlite::Error>> = match status {
            Some(status) => stmt
                .query_map(params![status.as_str()], session_from_row)?
                .collect(),
            None => stmt.query_map([], session_from_row)?.collect(),
        };
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }

        // Participants live in a JSON column; filter app-side.
        if let Some(participant) = participant {
            sessions.retain(|s| s.participants.contains(&participant));
        }
        Ok(sessions)
    }
}
