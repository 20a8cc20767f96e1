use std::sync::Arc;

use alloy_primitives::Address;
use serde_json::{json, Value};

use clearhouse_common::{
    api::app_session::{CloseAppSessionParams, CreateAppSessionParams, SubmitAppStateParams},
    rpc::{parse_params, RequestContext, RpcError},
};

use crate::core::broker::Broker;

fn broker(ctx: &RequestContext) -> Result<Arc<Broker>, RpcError> {
    ctx.data
        .get::<Arc<Broker>>()
        .map(Arc::clone)
        .map_err(RpcError::Internal)
}

/// Map request signers through the session-key registry so a delegated key
/// counts as its wallet in quorum math.
async fn resolve_signers(
    broker: &Broker,
    signers: &[Address],
) -> Result<Vec<Address>, RpcError> {
    let mut resolved = Vec::with_capacity(signers.len());
    for signer in signers {
        match broker.session_key_for(*signer).await? {
            Some(key) => resolved.push(key.wallet),
            None => resolved.push(*signer),
        }
    }
    Ok(resolved)
}

pub async fn create_app_session(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let params: CreateAppSessionParams = parse_params(ctx.params())?;
    let signers = resolve_signers(&broker, &ctx.signers).await?;
    let session = broker.create_app_session(&signers, params).await?;
    Ok(json!(session))
}

pub async fn submit_app_state(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let params: SubmitAppStateParams = parse_params(ctx.params())?;
    let signers = resolve_signers(&broker, &ctx.signers).await?;
    let session = broker.submit_app_state(&signers, params).await?;
    Ok(json!(session))
}

pub async fn close_app_session(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let params: CloseAppSessionParams = parse_params(ctx.params())?;
    let signers = resolve_signers(&broker, &ctx.signers).await?;
    let session = broker.close_app_session(&signers, params).await?;
    Ok(json!(session))
}
