//! Interceptors shipped with the pipeline.
//!
//! # Recommended Order
//! Chains run outermost-first:
//! 1. `ErrorInterceptor` - error boundary, outermost
//! 2. `LoggingInterceptor` - sees every call, including rejected ones
//! 3. `RateLimitInterceptor` - rejects before any token verification work
//! 4. `AuthInterceptor` - gateway check and identity injection
//!
//! A limiter keyed per user must sit after `AuthInterceptor`. It buckets on the
//! verified [`AuthInfo`](pipeline_core::AuthInfo) only, so in front of auth it
//! falls back to the API key for every call.
//!
//! Internal-only services use `GatewayInterceptor` in place of `AuthInterceptor`.

mod auth;
mod error;
mod gateway;
mod logging;
mod rate_limit;

pub use auth::{AuthConfig, AuthInterceptor};
pub use error::ErrorInterceptor;
pub use gateway::GatewayInterceptor;
pub use logging::{LoggingInterceptor, MAX_LOGGED_PAYLOAD};
pub use rate_limit::{KeyStrategy, RateLimitConfig, RateLimitInterceptor};
