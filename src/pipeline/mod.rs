//! Unary RPC pipeline.
//!
//! # Composition
//! A [`MethodTable`] lists the terminal handlers of a service. Wrapping it
//! with a [`Chain`] produces a [`Router`] whose handlers run the chain's
//! interceptors in order before the handler:
//!
//! - interceptors run outermost-first and never concurrently for one call
//! - an interceptor short-circuits by returning without calling `next`
//! - every call resolves to exactly one [`Outcome`]
//!
//! [`wrap_service`] is the alternative for services that need the panic
//! guard and error translation but no interceptors.

mod chain;
mod handler;
mod router;
mod sink;
mod wrapper;

pub use chain::{Chain, Interceptor, Next};
pub use handler::{Handler, MethodTable, RpcService};
pub(crate) use router::panic_message;
pub use router::{Outcome, Router, WrappedHandler};
pub use sink::Completion;
pub use wrapper::wrap_service;
