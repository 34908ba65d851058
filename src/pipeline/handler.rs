//! Terminal RPC handlers and the method tables that group them.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use pipeline_core::{Call, RpcError, RpcResult};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A business handler for one unary method.
///
/// Implemented for any `Fn(Call) -> impl Future<Output = RpcResult>`, so
/// closures and `async` blocks can be registered directly.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, call: Call) -> BoxFuture<'static, RpcResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult> + Send + 'static,
{
    fn call(&self, call: Call) -> BoxFuture<'static, RpcResult> {
        Box::pin(self(call))
    }
}

/// Explicit method-name → handler table.
///
/// Built once per service, then handed to `Chain::wrap` or `wrap_service`,
/// which return a new router without touching the table.
#[derive(Clone, Default)]
pub struct MethodTable {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl MethodTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw JSON handler. A later registration for the same name wins.
    #[must_use]
    pub fn route(mut self, name: impl Into<String>, handler: impl Handler) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Register a typed handler: the payload is decoded into `Req` and the
    /// response encoded from `Resp`.
    ///
    /// Decode failures short-circuit with `INVALID_ARGUMENT` before `f` runs.
    #[must_use]
    pub fn unary<Req, Resp, F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Call, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Resp>> + Send + 'static,
    {
        self.route(name, move |call: Call| {
            let pending = call.decode::<Req>().map(|req| f(call, req));
            async move {
                let response = pending?.await?;
                serde_json::to_value(response).map_err(|e| RpcError::Unexpected(e.into()))
            }
        })
    }

    /// Typed handler bound to a shared service instance.
    ///
    /// Every call receives a clone of the same `Arc`, so state and identity
    /// are shared with whoever else holds the service.
    #[must_use]
    pub fn method<S, Req, Resp, F, Fut>(self, name: impl Into<String>, service: &Arc<S>, f: F) -> Self
    where
        S: Send + Sync + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Arc<S>, Call, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Resp>> + Send + 'static,
    {
        let service = Arc::clone(service);
        self.unary(name, move |call, req| f(Arc::clone(&service), call, req))
    }

    /// Union of two tables. Entries from `other` win on name clashes.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.handlers.extend(other.handlers);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn into_handlers(self) -> impl Iterator<Item = (String, Arc<dyn Handler>)> {
        self.handlers.into_iter()
    }
}

impl std::fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// A service that exposes its typed methods as a [`MethodTable`].
pub trait RpcService: Send + Sync + 'static {
    fn method_table(self: Arc<Self>) -> MethodTable;
}
