use std::sync::Arc;

use serde_json::{json, Value};

use clearhouse_common::{
    api::{
        app_session::GetAppSessionsParams,
        channel::GetChannelsParams,
        GetUserTagParams,
    },
    rpc::{parse_params, RequestContext, RpcError},
};

use crate::core::broker::Broker;

fn broker(ctx: &RequestContext) -> Result<Arc<Broker>, RpcError> {
    ctx.data
        .get::<Arc<Broker>>()
        .map(Arc::clone)
        .map_err(RpcError::Internal)
}

pub async fn ping(_ctx: &mut RequestContext) -> Result<Value, RpcError> {
    Ok(Value::Null)
}

pub async fn get_config(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    Ok(json!(broker.config_view()))
}

pub async fn get_assets(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    Ok(json!({ "assets": broker.asset_views() }))
}

pub async fn get_channels(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let params: GetChannelsParams = parse_params(ctx.params())?;
    let wallet = params.wallet.or_else(|| ctx.signers.first().copied());
    let channels = broker.get_channels(wallet, params.status).await?;
    Ok(json!({ "channels": channels }))
}

pub async fn get_app_sessions(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let params: GetAppSessionsParams = parse_params(ctx.params())?;
    let participant = params.participant.or_else(|| ctx.signers.first().copied());
    let sessions = broker.get_app_sessions(participant, params.status).await?;
    Ok(json!({ "app_sessions": sessions }))
}

pub async fn get_user_tag(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let params: GetUserTagParams = parse_params(ctx.params())?;
    let wallet = params
        .wallet
        .or(ctx.user_id)
        .or_else(|| ctx.signers.first().copied())
        .ok_or(RpcError::AuthRequired)?;
    let tag = broker.get_user_tag(wallet).await?;
    Ok(json!({ "tag": tag }))
}
