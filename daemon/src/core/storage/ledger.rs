//! Journal entries, balances and transaction envelopes.

use std::collections::HashMap;
use std::str::FromStr;

use alloy_primitives::Address;
use bigdecimal::BigDecimal;
use rusqlite::{params, params_from_iter, types::Value as SqlValue, Row};

use clearhouse_common::{
    account::{AccountId, AccountType},
    api::ledger::BalanceEntry,
    time::get_current_time_in_millis,
    units,
};

use super::StoreTx;
use crate::core::{
    error::BrokerError,
    model::{Entry, LedgerTransaction, TransactionType},
};

fn parse_decimal_column(raw: &str) -> Result<BigDecimal, rusqlite::Error> {
    BigDecimal::from_str(raw).map_err(|_| rusqlite::Error::InvalidQuery)
}

fn entry_from_row(row: &Row<'_>) -> Result<Entry, rusqlite::Error> {
    let account_type_raw: u8 = row.get(2)?;
    let session_key: Option<String> = row.get(7)?;
    Ok(Entry {
        id: row.get(0)?,
        account_id: AccountId::new(row.get::<_, String>(1)?),
        account_type: AccountType::from_u8(account_type_raw)
            .ok_or(rusqlite::Error::InvalidQuery)?,
        asset: row.get(3)?,
        wallet: AccountId::new(row.get::<_, String>(4)?),
        credit: parse_decimal_column(&row.get::<_, String>(5)?)?,
        debit: parse_decimal_column(&row.get::<_, String>(6)?)?,
        session_key: session_key.and_then(|s| Address::from_str(&s).ok()),
        created_at: row.get(8)?,
    })
}

fn transaction_from_row(row: &Row<'_>) -> Result<LedgerTransaction, rusqlite::Error> {
    let tx_type_raw: String = row.get(1)?;
    Ok(LedgerTransaction {
        id: row.get(0)?,
        tx_type: TransactionType::parse(&tx_type_raw).ok_or(rusqlite::Error::InvalidQuery)?,
        from_account: AccountId::new(row.get::<_, String>(2)?),
        to_account: AccountId::new(row.get::<_, String>(3)?),
        asset: row.get(4)?,
        amount: parse_decimal_column(&row.get::<_, String>(5)?)?,
        created_at: row.get(6)?,
    })
}

impl StoreTx<'_> {
    /// Append one journal entry. Positive amounts credit the account,
    /// negative amounts debit it, zero is a no-op. No idempotency at this
    /// layer: callers own replay protection.
    pub fn record(
        &self,
        account: &AccountId,
        account_type: AccountType,
        asset: &str,
        wallet: &AccountId,
        amount: &BigDecimal,
        session_key: Option<Address>,
    ) -> Result<(), BrokerError> {
        if amount == &units::zero() {
            return Ok(());
        }
        let (credit, debit) = if units::is_negative(amount) {
            (units::zero(), -amount)
        } else {
            (amount.clone(), units::zero())
        };
        self.tx.execute(
            "INSERT INTO entries (account_id, account_type, asset_symbol, wallet, credit, debit, session_key, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                account.as_str(),
                account_type.as_u8(),
                asset,
                wallet.as_str(),
                credit.normalized().to_string(),
                debit.normalized().to_string(),
                session_key.map(|a| a.to_checksum(None)),
                get_current_time_in_millis(),
            ],
        )?;
        Ok(())
    }

    /// `Σcredit − Σdebit` over all entries of `(wallet, account, asset)`.
    pub fn balance(
        &self,
        wallet: &AccountId,
        account: &AccountId,
        asset: &str,
    ) -> Result<BigDecimal, BrokerError> {
        let mut stmt = self.tx.prepare(
            "SELECT credit, debit FROM entries WHERE wallet = ?1 AND account_id = ?2 AND asset_symbol = ?3",
        )?;
        let rows = stmt.query_map(params![wallet.as_str(), account.as_str(), asset], |row| {
            Ok((
                parse_decimal_column(&row.get::<_, String>(0)?)?,
                parse_decimal_column(&row.get::<_, String>(1)?)?,
            ))
        })?;
        let mut total = units::zero();
        for row in rows {
            let (credit, debit) = row?;
            total += credit - debit;
        }
        Ok(total)
    }

    /// Total balance of an account for one asset across all wallets
    /// (app-session pots aggregate per-participant rows).
    pub fn account_balance(
        &self,
        account: &AccountId,
        asset: &str,
    ) -> Result<BigDecimal, BrokerError> {
        let mut stmt = self
            .tx
            .prepare("SELECT credit, debit FROM entries WHERE account_id = ?1 AND asset_symbol = ?2")?;
        let rows = stmt.query_map(params![account.as_str(), asset], |row| {
            Ok((
                parse_decimal_column(&row.get::<_, String>(0)?)?,
                parse_decimal_column(&row.get::<_, String>(1)?)?,
            ))
        })?;
        let mut total = units::zero();
        for row in rows {
            let (credit, debit) = row?;
            total += credit - debit;
        }
        Ok(total)
    }

    /// Per-asset balances of an account, non-zero assets only.
    pub fn balances_for_account(
        &self,
        account: &AccountId,
    ) -> Result<Vec<BalanceEntry>, BrokerError> {
        let mut stmt = self.tx.prepare(
            "SELECT asset_symbol, credit, debit FROM entries WHERE account_id = ?1 ORDER BY asset_symbol",
        )?;
        let rows = stmt.query_map(params![account.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                parse_decimal_column(&row.get::<_, String>(1)?)?,
                parse_decimal_column(&row.get::<_, String>(2)?)?,
            ))
        })?;
        let mut totals: HashMap<String, BigDecimal> = HashMap::new();
        for row in rows {
            let (asset, credit, debit) = row?;
            *totals.entry(asset).or_insert_with(units::zero) += credit - debit;
        }
        let mut balances: Vec<BalanceEntry> = totals
            .into_iter()
            .map(|(asset, amount)| BalanceEntry { asset, amount })
            .collect();
        balances.sort_by(|a, b| a.asset.cmp(&b.asset));
        Ok(balances)
    }

    /// Per-(participant, asset) balances inside an app-session account.
    pub fn session_participant_balances(
        &self,
        session: &AccountId,
    ) -> Result<HashMap<(String, String), BigDecimal>, BrokerError> {
        let mut stmt = self.tx.prepare(
            "SELECT wallet, asset_symbol, credit, debit FROM entries WHERE account_id = ?1",
        )?;
        let rows = stmt.query_map(params![session.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                parse_decimal_column(&row.get::<_, String>(2)?)?,
                parse_decimal_column(&row.get::<_, String>(3)?)?,
            ))
        })?;
        let mut totals: HashMap<(String, String), BigDecimal> = HashMap::new();
        for row in rows {
            let (wallet, asset, credit, debit) = row?;
            *totals.entry((wallet, asset)).or_insert_with(units::zero) += credit - debit;
        }
        Ok(totals)
    }

    /// Sum of wallet-account debits performed under a session key, per
    /// asset. Drives the spending-cap check.
    pub fn session_key_spent(
        &self,
        session_key: Address,
        asset: &str,
    ) -> Result<BigDecimal, BrokerError> {
        let mut stmt = self.tx.prepare(
            "SELECT debit FROM entries WHERE session_key = ?1 AND asset_symbol = ?2 AND account_type = ?3",
        )?;
        let rows = stmt.query_map(
            params![
                session_key.to_checksum(None),
                asset,
                AccountType::Wallet.as_u8()
            ],
            |row| parse_decimal_column(&row.get::<_, String>(0)?),
        )?;
        let mut total = units::zero();
        for row in rows {
            total += row?;
        }
        Ok(total)
    }

    /// Write the human-readable envelope correlating a group of entries.
    pub fn record_transaction(
        &self,
        tx_type: TransactionType,
        from: &AccountId,
        to: &AccountId,
        asset: &str,
        amount: &BigDecimal,
    ) -> Result<LedgerTransaction, BrokerError> {
        let created_at = get_current_time_in_millis();
        self.tx.execute(
            "INSERT INTO ledger_transactions (tx_type, from_account, to_account, asset_symbol, amount, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tx_type.as_str(),
                from.as_str(),
                to.as_str(),
                asset,
                amount.normalized().to_string(),
                created_at,
            ],
        )?;
        Ok(LedgerTransaction {
            id: self.tx.last_insert_rowid() as u64,
            tx_type,
            from_account: from.clone(),
            to_account: to.clone(),
            asset: asset.to_string(),
            amount: amount.clone(),
            created_at,
        })
    }

    pub fn list_entries(
        &self,
        account: Option<&str>,
        asset: Option<&str>,
        wallet: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Entry>, BrokerError> {
        let mut sql = String::from(
            "SELECT id, account_id, account_type, asset_symbol, wallet, credit, debit, session_key, created_at \
             FROM entries WHERE 1=1",
        );
        let mut args: Vec<SqlValue> = Vec::new();
        if let Some(account) = account {
            sql.push_str(&format!(" AND account_id = ?{}", args.len() + 1));
            args.push(SqlValue::Text(account.to_string()));
        }
        if let Some(asset) = asset {
            sql.push_str(&format!(" AND asset_symbol = ?{}", args.len() + 1));
            args.push(SqlValue::Text(asset.to_string()));
        }
        if let Some(wallet) = wallet {
            sql.push_str(&format!(" AND wallet = ?{}", args.len() + 1));
            args.push(SqlValue::Text(wallet.to_string()));
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", limit));

        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), entry_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn list_transactions(
        &self,
        account: Option<&str>,
        asset: Option<&str>,
        tx_type: Option<TransactionType>,
        limit: u32,
    ) -> Result<Vec<LedgerTransaction>, BrokerError> {
        let mut sql = String::from(
            "SELECT id, tx_type, from_account, to_account, asset_symbol, amount, created_at \
             FROM ledger_transactions WHERE 1=1",
        );
        let mut args: Vec<SqlValue> = Vec::new();
        if let Some(account) = account {
            sql.push_str(&format!(
                " AND (from_account = ?{n} OR to_account = ?{n})",
                n = args.len() + 1
            ));
            args.push(SqlValue::Text(account.to_string()));
        }
        if let Some(asset) = asset {
            sql.push_str(&format!(" AND asset_symbol = ?{}", args.len() + 1));
            args.push(SqlValue::Text(asset.to_string()));
        }
        if let Some(tx_type) = tx_type {
            sql.push_str(&format!(" AND tx_type = ?{}", args.len() + 1));
            args.push(SqlValue::Text(tx_type.as_str().to_string()));
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", limit));

        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), transaction_from_row)?;
        let mut transactions = Vec::new();
        for row in rows {
            transactions.push(row?);
        }
        Ok(transactions)
    }
}
