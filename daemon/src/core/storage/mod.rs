//! SQLite-backed persistent state.
//!
//! A single connection behind an async mutex serializes writers; every
//! mutation runs inside [`Store::transaction`] so a handler either commits
//! all of its rows or none of them. Monetary columns are TEXT holding
//! decimal strings: sums are computed in application code with
//! `BigDecimal`, never with SQLite's floating-point SUM.

mod actions;
mod app_sessions;
mod channels;
mod events;
mod ledger;
mod misc;
mod session_keys;

use rusqlite::Connection;
use tokio::sync::Mutex;

use super::error::BrokerError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id TEXT NOT NULL,
    account_type INTEGER NOT NULL,
    asset_symbol TEXT NOT NULL,
    wallet TEXT NOT NULL,
    credit TEXT NOT NULL,
    debit TEXT NOT NULL,
    session_key TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entries_account ON entries(account_id, asset_symbol);
CREATE INDEX IF NOT EXISTS idx_entries_wallet ON entries(wallet, account_id, asset_symbol);
CREATE INDEX IF NOT EXISTS idx_entries_session_key ON entries(session_key);

CREATE TABLE IF NOT EXISTS ledger_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tx_type TEXT NOT NULL,
    from_account TEXT NOT NULL,
    to_account TEXT NOT NULL,
    asset_symbol TEXT NOT NULL,
    amount TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ledger_tx_accounts ON ledger_transactions(from_account, to_account);

CREATE TABLE IF NOT EXISTS channels (
    channel_id TEXT PRIMARY KEY,
    chain_id INTEGER NOT NULL,
    token TEXT NOT NULL,
    wallet TEXT NOT NULL,
    participant_signer TEXT NOT NULL,
    raw_amount TEXT NOT NULL,
    status TEXT NOT NULL,
    challenge INTEGER NOT NULL,
    nonce INTEGER NOT NULL,
    adjudicator TEXT NOT NULL,
    state TEXT NOT NULL,
    server_sig TEXT,
    user_sig TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_channels_wallet ON channels(wallet, status);

CREATE TABLE IF NOT EXISTS app_sessions (
    session_id TEXT PRIMARY KEY,
    participants TEXT NOT NULL,
    weights TEXT NOT NULL,
    quorum INTEGER NOT NULL,
    challenge INTEGER NOT NULL,
    nonce INTEGER NOT NULL,
    protocol TEXT,
    session_data TEXT,
    status TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS contract_events (
    chain_id INTEGER NOT NULL,
    contract_address TEXT NOT NULL,
    tx_hash TEXT NOT NULL,
    log_index INTEGER NOT NULL,
    block_number INTEGER NOT NULL,
    PRIMARY KEY (chain_id, tx_hash, log_index)
);
CREATE INDEX IF NOT EXISTS idx_contract_events_block ON contract_events(chain_id, block_number);

CREATE TABLE IF NOT EXISTS blockchain_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action_type TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    chain_id INTEGER NOT NULL,
    data TEXT NOT NULL,
    status TEXT NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    tx_hash TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_actions_pending ON blockchain_actions(chain_id, status, created_at);

CREATE TABLE IF NOT EXISTS session_keys (
    address TEXT PRIMARY KEY,
    wallet_address TEXT NOT NULL,
    application TEXT NOT NULL,
    scope TEXT NOT NULL,
    allowances TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_session_keys_wallet ON session_keys(wallet_address, application);

CREATE TABLE IF NOT EXISTS user_tags (
    wallet TEXT PRIMARY KEY,
    tag TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS rpc_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender TEXT NOT NULL,
    req_id INTEGER NOT NULL,
    method TEXT NOT NULL,
    params TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    signatures TEXT NOT NULL,
    response TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rpc_records_sender ON rpc_records(sender, id);
"#;

/// Handle to the broker database.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &str) -> Result<Self, BrokerError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Fresh private database, used by tests.
    pub fn in_memory() -> Result<Self, BrokerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, BrokerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside one SQLite transaction. Commits on Ok, rolls back on
    /// Err: callers never leave partial writes behind.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T, BrokerError>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, BrokerError> + Send,
        T: Send,
    {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let store_tx = StoreTx { tx };
        match f(&store_tx) {
            Ok(value) => {
                store_tx.tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Dropping the transaction rolls it back.
                Err(e)
            }
        }
    }
}

/// All typed operations available inside a transaction. Methods are split
/// across the sibling modules by concern.
pub struct StoreTx<'c> {
    pub(crate) tx: rusqlite::Transaction<'c>,
}
