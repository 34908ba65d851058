//! Unary RPC interceptor pipeline.
//!
//! A call flows through an ordered [`Chain`] of interceptors into the
//! handler registered for its method; the outcome is either a response
//! message or a [`WireError`](pipeline_core::WireError) whose status is taken
//! from a fixed taxonomy.
//!
//! ```text
//! Call → Error → Logging → RateLimit → Auth → handler
//! ```

pub mod config;
pub mod interceptors;
pub mod middleware;
pub mod pipeline;
pub mod routes;
pub mod services;
pub mod startup;
pub mod store;

pub use pipeline::{Chain, Completion, Interceptor, MethodTable, Next, Router, RpcService, wrap_service};
pub use pipeline_core::{AppError, Call, CallContext, RpcError, RpcResult, StatusCode, WireError};
