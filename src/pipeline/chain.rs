//! Chain-of-responsibility dispatcher for unary calls.
//!
//! Every call gets its own dispatch cursor starting at `-1`. Step `i` may
//! only run once the cursor is strictly below `i`, which rules out an
//! interceptor resuming the chain twice.

use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use pipeline_core::{Call, CallContext, RpcError, RpcResult};
use tracing::{debug, error};

use super::handler::{Handler, MethodTable};
use super::router::{Router, WrappedHandler};

/// Cross-cutting step wrapped around every handler of a chain.
///
/// An interceptor either short-circuits by returning without calling
/// [`Next::run`], or forwards the (possibly modified) call exactly once.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn intercept(&self, call: Call, ctx: &CallContext, next: Next<'_>) -> RpcResult;
}

/// Continuation handed to an interceptor: the rest of the chain.
pub struct Next<'a> {
    dispatch: &'a Dispatch<'a>,
    index: usize,
}

impl Next<'_> {
    /// Run the remaining interceptors and the handler.
    ///
    /// # Errors
    /// Propagates the downstream result. Calling `run` a second time yields
    /// [`RpcError::OrderingViolation`].
    pub async fn run(&self, call: Call) -> RpcResult {
        self.dispatch.run(self.index, call).await
    }
}

/// Per-call sequencing state.
struct Dispatch<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    handler: &'a dyn Handler,
    ctx: &'a CallContext,
    cursor: AtomicIsize,
}

impl<'a> Dispatch<'a> {
    fn new(
        interceptors: &'a [Arc<dyn Interceptor>],
        handler: &'a dyn Handler,
        ctx: &'a CallContext,
    ) -> Self {
        Self {
            interceptors,
            handler,
            ctx,
            cursor: AtomicIsize::new(-1),
        }
    }

    /// Move the cursor to `index`, refusing to go backwards or stay put.
    fn advance(&self, index: usize) -> Result<(), RpcError> {
        let target = isize::try_from(index).unwrap_or(isize::MAX);
        self.cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cursor| {
                (target > cursor).then_some(target)
            })
            .map(|_| ())
            .map_err(|cursor| {
                error!(
                    method = self.ctx.method(),
                    index,
                    cursor,
                    "next() called multiple times"
                );
                RpcError::OrderingViolation { index, cursor }
            })
    }

    fn run(&'a self, index: usize, call: Call) -> BoxFuture<'a, RpcResult> {
        Box::pin(async move {
            self.advance(index)?;
            match self.interceptors.get(index) {
                Some(interceptor) => {
                    debug!(
                        method = self.ctx.method(),
                        interceptor = interceptor.name(),
                        "Entering interceptor"
                    );
                    let next = Next {
                        dispatch: self,
                        index: index + 1,
                    };
                    interceptor.intercept(call, self.ctx, next).await
                }
                None => self.handler.call(call).await,
            }
        })
    }
}

/// Ordered interceptor list, applied outermost-first.
#[derive(Clone, Default)]
pub struct Chain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl Chain {
    #[must_use]
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: interceptors.into(),
        }
    }

    /// Append an interceptor so it runs after the existing ones.
    #[must_use]
    pub fn with(self, interceptor: impl Interceptor) -> Self {
        let mut interceptors = self.interceptors.to_vec();
        interceptors.push(Arc::new(interceptor));
        Self::new(interceptors)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.interceptors.iter().map(|i| i.name())
    }

    /// Wrap every method of `table` with this chain.
    #[must_use]
    pub fn wrap(&self, table: MethodTable) -> Router {
        let routes = table.into_handlers().map(|(name, handler)| {
            let wrapped: Arc<dyn WrappedHandler> = Arc::new(Intercepted {
                interceptors: Arc::clone(&self.interceptors),
                handler,
            });
            (name, wrapped)
        });
        Router::from_routes(routes)
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// A handler preceded by a chain of interceptors.
struct Intercepted {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    handler: Arc<dyn Handler>,
}

impl WrappedHandler for Intercepted {
    fn invoke(&self, mut call: Call) -> BoxFuture<'static, RpcResult> {
        let interceptors = Arc::clone(&self.interceptors);
        let handler = Arc::clone(&self.handler);

        Box::pin(async move {
            let ctx = CallContext::new(call.method(), call.metadata());
            call.extensions_mut().insert(ctx.clone());

            let dispatch = Dispatch::new(&interceptors, handler.as_ref(), &ctx);
            dispatch.run(0, call).await
        })
    }
}
