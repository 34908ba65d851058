//! Outermost error boundary.
//!
//! Application errors pass through untouched. Anything else, including a
//! panic further down the chain, is logged with full detail and replaced by
//! the generic internal error.

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use pipeline_core::{Call, CallContext, RpcError, RpcResult};
use tracing::warn;

use crate::pipeline::{Interceptor, Next};

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorInterceptor;

impl ErrorInterceptor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Interceptor for ErrorInterceptor {
    fn name(&self) -> &'static str {
        "error"
    }

    async fn intercept(&self, call: Call, ctx: &CallContext, next: Next<'_>) -> RpcResult {
        let result = match AssertUnwindSafe(next.run(call)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(RpcError::Panic(crate::pipeline::panic_message(panic.as_ref()))),
        };

        match result {
            Ok(response) => Ok(response),
            Err(RpcError::App(err)) => {
                warn!(
                    method = ctx.method(),
                    request_id = ctx.request_id(),
                    code = %err.code(),
                    message = err.message(),
                    "Application error"
                );
                Err(err.into())
            }
            Err(other) => Err(other.into_app_error(ctx.method()).into()),
        }
    }
}
