use std::sync::Arc;

use serde_json::{json, Value};

use clearhouse_common::{
    api::auth::{
        AuthJwtVerifyParams, AuthRequestParams, AuthVerifyParams, RevokeSessionKeyParams,
    },
    rpc::{parse_params, RequestContext, RpcError},
    time::get_current_time_in_millis,
};

use crate::core::{broker::Broker, model::SessionKey};

fn broker(ctx: &RequestContext) -> Result<Arc<Broker>, RpcError> {
    ctx.data
        .get::<Arc<Broker>>()
        .map(Arc::clone)
        .map_err(RpcError::Internal)
}

pub async fn auth_request(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let params: AuthRequestParams = parse_params(ctx.params())?;
    let challenge = broker.auth().create_challenge(&params).await?;
    Ok(json!({ "challenge_message": challenge }))
}

pub async fn auth_verify(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let params: AuthVerifyParams = parse_params(ctx.params())?;
    let challenge = broker
        .auth()
        .verify_challenge(&params.challenge, &params.signature)
        .await?;

    // Persist the delegated key; a fresh key replaces any live one for the
    // same (wallet, application).
    let wallet = challenge.address;
    let key = SessionKey {
        address: challenge.session_key,
        wallet,
        application: challenge.application.clone(),
        scope: challenge.scope.clone(),
        allowances: challenge.allowances.clone(),
        expires_at: challenge.session_key_expires_at,
        created_at: get_current_time_in_millis(),
    };
    broker.register_session_key(key).await?;
    broker.auth().register_session(wallet).await;
    let jwt_token = broker.auth().issue_jwt(&challenge)?;

    // The dispatcher observes the changed user id and binds this
    // connection to the wallet.
    ctx.user_id = Some(wallet);

    Ok(json!({
        "address": wallet,
        "session_key": challenge.session_key,
        "jwt_token": jwt_token,
    }))
}

pub async fn auth_jwt_verify(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let params: AuthJwtVerifyParams = parse_params(ctx.params())?;
    let claims = broker.auth().verify_jwt(&params.jwt)?;

    let wallet = claims
        .sub
        .parse()
        .map_err(|_| RpcError::client("invalid JWT subject"))?;
    broker.auth().register_session(wallet).await;
    ctx.user_id = Some(wallet);

    Ok(json!({
        "address": wallet,
        "session_key": claims.policy.participant,
    }))
}

pub async fn get_session_keys(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let user = ctx.require_user()?;
    let keys = broker.get_session_keys(user).await?;
    Ok(json!({ "session_keys": keys }))
}

pub async fn revoke_session_key(ctx: &mut RequestContext) -> Result<Value, RpcError> {
    let broker = broker(ctx)?;
    let user = ctx.require_user()?;
    let params: RevokeSessionKeyParams = parse_params(ctx.params())?;
    let revoked = broker.revoke_session_key(user, params.session_key).await?;
    Ok(json!({
        "session_key": params.session_key,
        "revoked": revoked,
    }))
}
