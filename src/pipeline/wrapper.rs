//! Safety net for services exposed without an interceptor chain.

use std::sync::Arc;

use futures::future::BoxFuture;
use pipeline_core::{Call, RpcResult};

use super::handler::{Handler, MethodTable};
use super::router::{Router, WrappedHandler};

struct Guarded {
    handler: Arc<dyn Handler>,
}

impl WrappedHandler for Guarded {
    fn invoke(&self, call: Call) -> BoxFuture<'static, RpcResult> {
        let handler = Arc::clone(&self.handler);
        // Deferred so a panic while building the handler future is still
        // caught by the router's guard.
        Box::pin(async move { handler.call(call).await })
    }
}

/// Wrap every method of `table` individually with the router's panic guard
/// and error translation, without any interceptors.
#[must_use]
pub fn wrap_service(table: MethodTable) -> Router {
    Router::from_routes(table.into_handlers().map(|(name, handler)| {
        let wrapped: Arc<dyn WrappedHandler> = Arc::new(Guarded { handler });
        (name, wrapped)
    }))
}
