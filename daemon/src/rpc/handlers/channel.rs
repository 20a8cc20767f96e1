use std::sync::Arc;

use serde_json::{json, Value};

use clearhouse_common::{
    api::channel::{CloseChannelParams, CreateChannelParams, ResizeChannelParams},
    rpc::{parse_params, RequestContext, RpcError},
};

use crate::core::broker::Broker;

fn broker(ctx: &RequestContext) -> Result<Arc<Broker>, RpcError> {
    ctx.data
        .get::<Arc<Broker>>()
        .map(Arc::clone)
        .map_err(RpcError::Internal)
}

pub async fn create_channel(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let user = ctx.require_user()?;
    let params: CreateChannelParams = parse_params(ctx.params())?;
    let result = broker.request_create_channel(user, params).await?;
    Ok(json!(result))
}

pub async fn resize_channel(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let user = ctx.require_user()?;
    let params: ResizeChannelParams = parse_params(ctx.params())?;
    let result = broker.request_resize_channel(user, params).await?;
    Ok(json!(result))
}

pub async fn close_channel(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let user = ctx.require_user()?;
    let params: CloseChannelParams = parse_params(ctx.params())?;
    let result = broker.request_close_channel(user, params).await?;
    Ok(json!(result))
}
