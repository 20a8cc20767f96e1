//! Middleware chained ahead of state-changing handlers: replay protection,
//! signature-based authentication and session-key spending caps.

use std::sync::Arc;

use async_trait::async_trait;

use clearhouse_common::{
    api::{app_session::CreateAppSessionParams, ledger::TransferParams},
    rpc::{parse_params, Middleware, RequestContext, RpcError},
};

use crate::core::{broker::Broker, error::BrokerError, model::SessionKey};

/// Rejects byte-identical resends within the replay TTL.
pub struct MessageCacheMiddleware {
    broker: Arc<Broker>,
}

impl MessageCacheMiddleware {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Middleware for MessageCacheMiddleware {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), RpcError> {
        self.broker.message_cache().check_and_insert(&ctx.raw).await
    }
}

/// Authenticates the request from its first signature: either the wallet
/// itself signed, or a delegated session key did, in which case the request
/// acts for the key's wallet.
pub struct SignatureAuthMiddleware {
    broker: Arc<Broker>,
}

impl SignatureAuthMiddleware {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Middleware for SignatureAuthMiddleware {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), RpcError> {
        let signer = *ctx.signers.first().ok_or(RpcError::InvalidSignature)?;
        match self.broker.session_key_for(signer).await? {
            Some(key) => {
                ctx.user_id = Some(key.wallet);
                ctx.session_key = Some(signer);
                ctx.data.store(key);
            }
            None => {
                ctx.user_id = Some(signer);
            }
        }
        Ok(())
    }
}

/// Single-party operations must carry exactly one distinct signer.
pub struct SingleSignerMiddleware;

#[async_trait]
impl Middleware for SingleSignerMiddleware {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), RpcError> {
        let mut distinct = ctx.signers.clone();
        distinct.sort();
        distinct.dedup();
        if distinct.len() != 1 {
            return Err(RpcError::client(
                "operation accepts exactly one signer",
            ));
        }
        Ok(())
    }
}

/// Enforces per-asset spending caps for session-key-signed requests.
///
/// Spending is what leaves the wallet account: transfer allocations and the
/// caller's own app-session deposits. Channel operations require the wallet
/// signature itself.
pub struct SpendingCapMiddleware {
    broker: Arc<Broker>,
}

impl SpendingCapMiddleware {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    fn outflows(
        ctx: &RequestContext,
    ) -> Result<Vec<(String, bigdecimal::BigDecimal)>, RpcError> {
        match ctx.request.method.as_str() {
            "transfer" => {
                let params: TransferParams = parse_params(ctx.params())?;
                Ok(params
                    .allocations
                    .into_iter()
                    .map(|a| (a.asset, a.amount))
                    .collect())
            }
            "create_app_session" => {
                let params: CreateAppSessionParams = parse_params(ctx.params())?;
                let user = ctx.user_id;
                Ok(params
                    .allocations
                    .into_iter()
                    .filter(|a| Some(a.participant) == user)
                    .map(|a| (a.asset, a.amount))
                    .collect())
            }
            "create_channel" | "resize_channel" | "close_channel" => Err(RpcError::client(
                "channel operations require the wallet signature",
            )),
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Middleware for SpendingCapMiddleware {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), RpcError> {
        if ctx.session_key.is_none() {
            return Ok(());
        }
        let outflows = Self::outflows(ctx)?;
        if outflows.is_empty() {
            return Ok(());
        }
        let key: SessionKey = ctx
            .data
            .get::<SessionKey>()
            .map_err(RpcError::Internal)?
            .clone();

        for (asset, amount) in outflows {
            let remaining = self
                .broker
                .remaining_allowance(&key, &asset)
                .await
                .map_err(RpcError::from)?;
            if amount > remaining {
                return Err(BrokerError::InsufficientAllowance.into());
            }
        }
        Ok(())
    }
}
