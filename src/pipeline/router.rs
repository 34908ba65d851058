//! Method routing and the single delivery boundary.
//!
//! Every wrapped handler is driven through [`settle`], which turns any
//! failure (error result or panic) into exactly one [`WireError`].

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use pipeline_core::{AppError, Call, RpcError, RpcResult, WireError};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{Instrument, info_span};

use super::sink::Completion;

/// Terminal outcome delivered to the caller of a unary call.
pub type Outcome = Result<Value, WireError>;

/// A handler after wrapping: callable with a raw call, yielding a raw result.
pub trait WrappedHandler: Send + Sync + 'static {
    fn invoke(&self, call: Call) -> BoxFuture<'static, RpcResult>;
}

/// Method-name → wrapped handler.
///
/// Cheap to clone; all clones share the same routes.
#[derive(Clone, Default)]
pub struct Router {
    routes: Arc<HashMap<String, Arc<dyn WrappedHandler>>>,
}

impl Router {
    pub(crate) fn from_routes(
        routes: impl IntoIterator<Item = (String, Arc<dyn WrappedHandler>)>,
    ) -> Self {
        Self {
            routes: Arc::new(routes.into_iter().collect()),
        }
    }

    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.routes.contains_key(method)
    }

    /// Registered method names, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<_> = self.routes.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    /// Union of two routers. Routes from `other` win on name clashes.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        let routes = self
            .routes
            .iter()
            .chain(other.routes.iter())
            .map(|(name, route)| (name.clone(), Arc::clone(route)));
        Self::from_routes(routes)
    }

    /// Run one call to completion. Always resolves to exactly one outcome.
    pub async fn handle(&self, call: Call) -> Outcome {
        let method = call.method().to_owned();
        let Some(route) = self.routes.get(&method) else {
            return Err(AppError::unimplemented(format!("Method not found: {method}")).to_wire_error());
        };

        let span = info_span!("rpc", method = %method);
        settle(&method, route.invoke(call)).instrument(span).await
    }

    /// Run `call` on its own task and fire `sink` with the outcome.
    pub fn dispatch(&self, call: Call, sink: Completion) {
        let router = self.clone();
        tokio::spawn(async move {
            let outcome = router.handle(call).await;
            sink.complete(outcome);
        });
    }

    /// Run `call` on its own task; the outcome arrives on the returned receiver.
    #[must_use]
    pub fn spawn(&self, call: Call) -> oneshot::Receiver<Outcome> {
        let (sink, receiver) = Completion::channel(call.method());
        self.dispatch(call, sink);
        receiver
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("methods", &self.methods())
            .finish()
    }
}

/// Await a handler future under a panic guard and translate its result.
pub(crate) async fn settle(method: &str, pending: BoxFuture<'static, RpcResult>) -> Outcome {
    match AssertUnwindSafe(pending).catch_unwind().await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(err)) => Err(err.into_wire_error(method)),
        Err(panic) => Err(RpcError::Panic(panic_message(panic.as_ref())).into_wire_error(method)),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
