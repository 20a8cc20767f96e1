//! Method registry with groups and middleware chains.
//!
//! Handlers are plain async functions over a mutable [`RequestContext`].
//! Groups accumulate middleware; a method's effective chain
//! (`parent middleware ++ group middleware ++ handler`) is computed once at
//! registration time and looked up per request.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{RpcError, RpcPayload};
use crate::context::Context;

/// Per-request state threaded through the middleware chain and the handler.
pub struct RequestContext {
    /// The parsed payload array.
    pub request: RpcPayload,
    /// Raw inbound frame bytes, used for replay protection hashing.
    pub raw: Vec<u8>,
    /// Addresses recovered from the request signatures, in order.
    pub signers: Vec<Address>,
    /// The authenticated wallet. Middleware sets this; when it changes, the
    /// dispatcher updates the connection hub's user mapping.
    pub user_id: Option<Address>,
    /// Set when the request was signed by a delegated session key rather
    /// than the wallet itself.
    pub session_key: Option<Address>,
    /// Type-map carrying shared services and per-connection values.
    pub data: Context,
}

impl RequestContext {
    pub fn new(request: RpcPayload, raw: Vec<u8>, signers: Vec<Address>) -> Self {
        Self {
            request,
            raw,
            signers,
            user_id: None,
            session_key: None,
            data: Context::new(),
        }
    }

    pub fn params(&self) -> Value {
        self.request.params.clone()
    }

    /// The authenticated wallet, or an error if no middleware set it.
    pub fn require_user(&self) -> Result<Address, RpcError> {
        self.user_id.ok_or(RpcError::AuthRequired)
    }
}

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + 'a>>;

/// A registered method handler.
pub type Handler = for<'a> fn(&'a mut RequestContext) -> HandlerFuture<'a>;

/// Pre-handler hook. Middleware runs in registration order and can reject
/// the request or mutate the context (authentication, replay protection,
/// allowance checks).
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), RpcError>;
}

struct RegisteredMethod {
    chain: Vec<Arc<dyn Middleware>>,
    handler: Handler,
}

/// The method registry.
pub struct RpcHandler {
    methods: HashMap<String, RegisteredMethod>,
}

impl RpcHandler {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// The root group, with no middleware attached.
    pub fn root(&mut self) -> Group<'_> {
        Group {
            registry: self,
            chain: Vec::new(),
        }
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(|s| s.as_str())
    }

    /// Run the method's middleware chain then its handler.
    pub async fn handle(&self, ctx: &mut RequestContext) -> Result<Value, RpcError> {
        let registered = self
            .methods
            .get(&ctx.request.method)
            .ok_or_else(|| RpcError::MethodNotFound(ctx.request.method.clone()))?;

        for middleware in &registered.chain {
            middleware.handle(ctx).await?;
        }
        (registered.handler)(ctx).await
    }

    fn register(&mut self, name: &str, chain: Vec<Arc<dyn Middleware>>, handler: Handler) {
        // Duplicate or empty method names are configuration bugs.
        assert!(!name.is_empty(), "method name cannot be empty");
        let previous = self
            .methods
            .insert(name.to_string(), RegisteredMethod { chain, handler });
        assert!(previous.is_none(), "method '{}' registered twice", name);
    }
}

impl Default for RpcHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// A registration scope accumulating middleware for its methods.
pub struct Group<'r> {
    registry: &'r mut RpcHandler,
    chain: Vec<Arc<dyn Middleware>>,
}

impl<'r> Group<'r> {
    /// Append middleware to this group's chain.
    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.chain.push(middleware);
        self
    }

    /// Child group inheriting this group's chain.
    pub fn group(&mut self) -> Group<'_> {
        Group {
            registry: &mut *self.registry,
            chain: self.chain.clone(),
        }
    }

    pub fn register_method(&mut self, name: &str, handler: Handler) {
        self.registry.register(name, self.chain.clone(), handler);
    }
}

/// Coerce an async fn into a [`Handler`].
#[macro_export]
macro_rules! async_handler {
    ($func:expr) => {{
        fn __handler(
            ctx: &mut $crate::rpc::RequestContext,
        ) -> $crate::rpc::HandlerFuture<'_> {
            Box::pin($func(ctx))
        }
        __handler as $crate::rpc::Handler
    }};
}

/// Deserialize request params; `null` is treated as an empty object so
/// methods without params accept both shapes.
pub fn parse_params<T: DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    let value = if value.is_null() {
        Value::Object(Default::default())
    } else {
        value
    };
    serde_json::from_value(value).map_err(RpcError::InvalidParams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_handler;
    use serde_json::json;

    async fn ping(_ctx: &mut RequestContext) -> Result<Value, RpcError> {
        Ok(json!("pong"))
    }

    async fn whoami(ctx: &mut RequestContext) -> Result<Value, RpcError> {
        Ok(json!(ctx.require_user()?.to_checksum(None)))
    }

    struct Authenticate(Address);

    #[async_trait]
    impl Middleware for Authenticate {
        async fn handle(&self, ctx: &mut RequestContext) -> Result<(), RpcError> {
            ctx.user_id = Some(self.0);
            Ok(())
        }
    }

    struct Reject;

    #[async_trait]
    impl Middleware for Reject {
        async fn handle(&self, _ctx: &mut RequestContext) -> Result<(), RpcError> {
            Err(RpcError::AuthRequired)
        }
    }

    fn context_for(method: &str) -> RequestContext {
        RequestContext::new(
            RpcPayload::new(1, method, Value::Null, 0),
            Vec::new(),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn routes_to_registered_handler() {
        let mut handler = RpcHandler::new();
        handler.root().register_method("ping", async_handler!(ping));

        let mut ctx = context_for("ping");
        let result = handler.handle(&mut ctx).await.unwrap();
        assert_eq!(result, json!("pong"));
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let handler = RpcHandler::new();
        let mut ctx = context_for("nope");
        let err = handler.handle(&mut ctx).await.unwrap_err();
        assert!(matches!(err, RpcError::MethodNotFound(_)));
    }

    #[tokio::test]
    async fn group_middleware_runs_before_handler() {
        let wallet = Address::repeat_byte(0xAA);
        let mut handler = RpcHandler::new();
        let mut root = handler.root();
        root.register_method("ping", async_handler!(ping));
        let mut authed = root.group().with(Arc::new(Authenticate(wallet)));
        authed.register_method("whoami", async_handler!(whoami));

        let mut ctx = context_for("whoami");
        let result = handler.handle(&mut ctx).await.unwrap();
        assert_eq!(result, json!(wallet.to_checksum(None)));

        // The root method must not inherit the child group's middleware.
        let mut ctx = context_for("ping");
        assert!(handler.handle(&mut ctx).await.is_ok());
    }

    #[tokio::test]
    async fn middleware_error_short_circuits() {
        let mut handler = RpcHandler::new();
        let mut guarded = handler.root().with(Arc::new(Reject));
        guarded.register_method("ping", async_handler!(ping));

        let mut ctx = context_for("ping");
        let err = handler.handle(&mut ctx).await.unwrap_err();
        assert!(matches!(err, RpcError::AuthRequired));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let mut handler = RpcHandler::new();
        handler.root().register_method("ping", async_handler!(ping));
        handler.root().register_method("ping", async_handler!(ping));
    }
}
