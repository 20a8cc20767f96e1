//! Method registration: groups accumulate middleware, so every
//! state-changing method sits behind replay protection and signature
//! authentication, and spending methods additionally behind the session-key
//! allowance check.

mod app_session;
mod auth;
mod channel;
mod ledger;
mod public;

use std::sync::Arc;

use clearhouse_common::{async_handler, rpc::RpcHandler};

use crate::core::broker::Broker;

use super::middleware::{
    MessageCacheMiddleware, SignatureAuthMiddleware, SingleSignerMiddleware, SpendingCapMiddleware,
};

pub fn register_methods(handler: &mut RpcHandler, broker: &Arc<Broker>) {
    let mut root = handler.root();

    // Public surface: no signature requirements.
    root.register_method("ping", async_handler!(public::ping));
    root.register_method("get_config", async_handler!(public::get_config));
    root.register_method("get_assets", async_handler!(public::get_assets));
    root.register_method("get_channels", async_handler!(public::get_channels));
    root.register_method("get_app_sessions", async_handler!(public::get_app_sessions));
    root.register_method("get_user_tag", async_handler!(public::get_user_tag));
    root.register_method("auth_request", async_handler!(auth::auth_request));
    root.register_method("auth_verify", async_handler!(auth::auth_verify));
    root.register_method("auth_jwt_verify", async_handler!(auth::auth_jwt_verify));

    // Signed surface: replay protection + signature authentication.
    let mut authed = root
        .group()
        .with(Arc::new(MessageCacheMiddleware::new(broker.clone())))
        .with(Arc::new(SignatureAuthMiddleware::new(broker.clone())));
    authed.register_method(
        "get_ledger_balances",
        async_handler!(ledger::get_ledger_balances),
    );
    authed.register_method(
        "get_ledger_entries",
        async_handler!(ledger::get_ledger_entries),
    );
    authed.register_method(
        "get_ledger_transactions",
        async_handler!(ledger::get_ledger_transactions),
    );
    authed.register_method("get_rpc_history", async_handler!(ledger::get_rpc_history));
    authed.register_method(
        "get_session_keys",
        async_handler!(auth::get_session_keys),
    );

    // Multi-signature surface: app sessions verify their own weighted
    // quorum, but spending caps still apply to the caller.
    let mut multi = authed
        .group()
        .with(Arc::new(SpendingCapMiddleware::new(broker.clone())));
    multi.register_method(
        "create_app_session",
        async_handler!(app_session::create_app_session),
    );
    multi.register_method(
        "submit_app_state",
        async_handler!(app_session::submit_app_state),
    );
    multi.register_method(
        "close_app_session",
        async_handler!(app_session::close_app_session),
    );

    // Single-party surface.
    let mut single = authed
        .group()
        .with(Arc::new(SingleSignerMiddleware))
        .with(Arc::new(SpendingCapMiddleware::new(broker.clone())));
    single.register_method("transfer", async_handler!(ledger::transfer));
    single.register_method("create_channel", async_handler!(channel::create_channel));
    single.register_method("resize_channel", async_handler!(channel::resize_channel));
    single.register_method("close_channel", async_handler!(channel::close_channel));
    single.register_method(
        "revoke_session_key",
        async_handler!(auth::revoke_session_key),
    );
}
