//! HTTP-side middleware for the JSON binding.
//!
//! Layers run outermost-first on the request:
//! 1. `RequestIdLayer` - stamp the request id before anything logs
//! 2. `TraceLayer` - request span
//! 3. `TimeoutLayer` - bound the whole call
//! 4. `CorsLayer`
//!
//! Authentication is not an HTTP layer here; it runs inside the call
//! pipeline as `AuthInterceptor`.

pub mod client_ip;
pub mod request_id;

pub use client_ip::ClientIp;
pub use request_id::{RequestId, RequestIdLayer};
