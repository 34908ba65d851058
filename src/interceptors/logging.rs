//! Request/response logging and per-method metrics.
//!
//! # Metrics Emitted
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `rpc_requests_total` | Counter | `method`, `status` |
//! | `rpc_request_duration_seconds` | Histogram | `method`, `status` |
//!
//! `method` comes from the router's table, so label cardinality is bounded
//! by the registered methods.

use async_trait::async_trait;
use chrono::Utc;
use pipeline_core::{Call, CallContext, RpcResult, StatusCode};
use serde_json::Value;
use tokio::time::Instant;
use tracing::info;

use crate::middleware::ClientIp;
use crate::pipeline::{Interceptor, Next};

/// Payloads longer than this many characters are truncated in logs.
pub const MAX_LOGGED_PAYLOAD: usize = 2048;

const UNRENDERABLE: &str = "<unrenderable>";

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

impl LoggingInterceptor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn render(payload: &Value) -> String {
    let Ok(mut rendered) = serde_json::to_string(payload) else {
        return UNRENDERABLE.to_owned();
    };
    if let Some((cut, _)) = rendered.char_indices().nth(MAX_LOGGED_PAYLOAD) {
        rendered.truncate(cut);
        rendered.push_str("...");
    }
    rendered
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn intercept(&self, call: Call, ctx: &CallContext, next: Next<'_>) -> RpcResult {
        info!(
            method = ctx.method(),
            request_id = ctx.request_id(),
            payload = %render(call.request()),
            client_ip = ?call.extensions().get::<ClientIp>().and_then(ClientIp::ip),
            received_at = %ctx.received_at().to_rfc3339(),
            "Received call"
        );

        let started = Instant::now();
        let result = next.run(call).await;
        let elapsed = started.elapsed();

        let status = result.as_ref().map_or_else(|e| e.status_code(), |_| StatusCode::Ok);
        match &result {
            Ok(response) => info!(
                method = ctx.method(),
                request_id = ctx.request_id(),
                status = %status,
                response = %render(response),
                sent_at = %Utc::now().to_rfc3339(),
                elapsed_ms = elapsed.as_millis(),
                "Sent response"
            ),
            Err(_) => info!(
                method = ctx.method(),
                request_id = ctx.request_id(),
                status = %status,
                sent_at = %Utc::now().to_rfc3339(),
                elapsed_ms = elapsed.as_millis(),
                "Call failed"
            ),
        }

        let labels = [
            ("method", ctx.method().to_owned()),
            ("status", status.as_str().to_owned()),
        ];
        metrics::counter!("rpc_requests_total", &labels).increment(1);
        metrics::histogram!("rpc_request_duration_seconds", &labels).record(elapsed.as_secs_f64());

        result
    }
}
