use std::sync::Arc;

use serde_json::{json, Value};

use clearhouse_common::{
    account::AccountId,
    api::ledger::{
        GetLedgerBalancesParams, GetLedgerEntriesParams, GetLedgerTransactionsParams,
        GetRpcHistoryParams, TransferParams,
    },
    rpc::{parse_params, RequestContext, RpcError},
};

use crate::core::{broker::Broker, model::TransactionType};

fn broker(ctx: &RequestContext) -> Result<Arc<Broker>, RpcError> {
    ctx.data
        .get::<Arc<Broker>>()
        .map(Arc::clone)
        .map_err(RpcError::Internal)
}

pub async fn transfer(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let user = ctx.require_user()?;
    let params: TransferParams = parse_params(ctx.params())?;
    let result = broker.transfer(user, params, ctx.session_key).await?;
    Ok(json!(result))
}

pub async fn get_ledger_balances(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let user = ctx.require_user()?;
    let params: GetLedgerBalancesParams = parse_params(ctx.params())?;
    let account = params
        .account_id
        .map(AccountId::new)
        .unwrap_or_else(|| AccountId::from_wallet(user));
    let balances = broker.get_ledger_balances(&account).await?;
    Ok(json!({ "ledger_balances": balances }))
}

pub async fn get_ledger_entries(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let user = ctx.require_user()?;
    let params: GetLedgerEntriesParams = parse_params(ctx.params())?;
    let account = params
        .account_id
        .map(|a| AccountId::new(a).as_str().to_string())
        .or_else(|| Some(AccountId::from_wallet(user).as_str().to_string()));
    let wallet = params
        .wallet
        .map(|w| AccountId::new(w).as_str().to_string());
    let entries = broker
        .get_ledger_entries(account, params.asset, wallet)
        .await?;
    Ok(json!({ "ledger_entries": entries }))
}

pub async fn get_ledger_transactions(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let user = ctx.require_user()?;
    let params: GetLedgerTransactionsParams = parse_params(ctx.params())?;
    let account = params
        .account_id
        .map(|a| AccountId::new(a).as_str().to_string())
        .or_else(|| Some(AccountId::from_wallet(user).as_str().to_string()));
    let tx_type = match params.tx_type.as_deref() {
        Some(raw) => Some(
            TransactionType::parse(raw)
                .ok_or_else(|| RpcError::client(format!("unknown transaction type: {}", raw)))?,
        ),
        None => None,
    };
    let transactions = broker
        .get_ledger_transactions(account, params.asset, tx_type)
        .await?;
    Ok(json!({ "ledger_transactions": transactions }))
}

pub async fn get_rpc_history(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let user = ctx.require_user()?;
    let params: GetRpcHistoryParams = parse_params(ctx.params())?;
    let limit = params.limit.unwrap_or(50).min(500);
    let offset = params.offset.unwrap_or(0);
    let entries = broker.get_rpc_history(user, limit, offset).await?;
    Ok(json!({ "rpc_entries": entries }))
}
