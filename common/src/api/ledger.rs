use alloy_primitives::Address;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    account::{AccountId, AccountType},
    crypto::RpcSignature,
    time::TimestampMillis,
};

/// One asset leg of a transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAllocation {
    pub asset: String,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferParams {
    /// Destination wallet address; mutually exclusive with the user tag.
    pub destination: Option<Address>,
    pub destination_user_tag: Option<String>,
    pub allocations: Vec<TransferAllocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: u64,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub from_account: AccountId,
    pub to_account: AccountId,
    pub asset: String,
    pub amount: BigDecimal,
    pub created_at: TimestampMillis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub transactions: Vec<TransactionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLedgerBalancesParams {
    /// Defaults to the caller's wallet account.
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub asset: String,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLedgerBalancesResult {
    pub ledger_balances: Vec<BalanceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLedgerEntriesParams {
    pub account_id: Option<String>,
    pub asset: Option<String>,
    pub wallet: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRecord {
    pub id: u64,
    pub account_id: AccountId,
    pub account_type: AccountType,
    pub asset: String,
    pub wallet: AccountId,
    pub credit: BigDecimal,
    pub debit: BigDecimal,
    pub session_key: Option<Address>,
    pub created_at: TimestampMillis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLedgerEntriesResult {
    pub ledger_entries: Vec<EntryRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLedgerTransactionsParams {
    pub account_id: Option<String>,
    pub asset: Option<String>,
    #[serde(rename = "type")]
    pub tx_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLedgerTransactionsResult {
    pub ledger_transactions: Vec<TransactionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRpcHistoryParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcHistoryEntry {
    pub id: u64,
    pub sender: Address,
    pub req_id: u64,
    pub method: String,
    pub params: Value,
    pub timestamp: TimestampMillis,
    pub signatures: Vec<RpcSignature>,
    pub response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRpcHistoryResult {
    pub rpc_entries: Vec<RpcHistoryEntry>,
}

/// Balance notification payload (`balance_update`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceUpdateNotification {
    pub balance_updates: Vec<BalanceEntry>,
}

/// Transfer notification payload (`transfer`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferNotification {
    pub transactions: Vec<TransactionRecord>,
}
