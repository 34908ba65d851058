//! REST routes: health checks, metrics and the JSON binding of the pipeline.
//!
//! `POST /rpc/{method}` carries one unary call. Request headers become call
//! metadata and the body is the JSON request message (empty means none).

use axum::body::{Body, to_bytes};
use axum::extract::{Path, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pipeline_core::{
    AppError, Call, Metadata, StatusCode as RpcStatus, WireError, keys, presentation_status,
};
use serde::Serialize;
use serde_json::Value;

use crate::middleware::{ClientIp, RequestId};
use crate::pipeline::Router as RpcRouter;
use crate::startup::AppState;

/// Build version.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Request bodies above this size are rejected.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

const UNAVAILABLE_MESSAGE: &str = "Service Unavailable. Please try again later.";

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    counters: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl CheckResult {
    const fn healthy() -> Self {
        Self {
            status: "healthy",
            message: None,
        }
    }

    fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: "unhealthy",
            message: Some(message.into()),
        }
    }
}

/// Error body of a failed call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    pub error_code: &'static str,
    pub grpc_status: i32,
}

/// Build REST routes with the given application state.
pub fn rest_routes(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(|| async { pipeline_telemetry::SERVICE_NAME }))
        .route("/health", get(|| async { "OK" }))
        .route("/health/live", get(|| async { "OK" }))
        .route("/health/ready", get(readiness_handler))
        .route("/rpc/{method}", post(rpc_handler));

    if state.internal.is_some() {
        router = router.route("/internal/rpc/{method}", post(internal_rpc_handler));
    }

    #[cfg(feature = "prometheus")]
    if state.metrics.is_some() {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.with_state(state)
}

#[cfg(feature = "prometheus")]
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.map(|h| h.render()).unwrap_or_default()
}

async fn readiness_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let counters = if state.store.health_check().await {
        CheckResult::healthy()
    } else {
        CheckResult::unhealthy("Counter store unreachable")
    };

    let healthy = counters.status == "healthy";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" },
            version: VERSION,
            checks: HealthChecks { counters },
        }),
    )
}

async fn rpc_handler(
    State(state): State<AppState>,
    Path(method): Path<String>,
    req: Request,
) -> Response {
    invoke(&state.router, method, req).await
}

async fn internal_rpc_handler(
    State(state): State<AppState>,
    Path(method): Path<String>,
    req: Request,
) -> Response {
    match &state.internal {
        Some(router) => invoke(router, method, req).await,
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Run one call through `router` and render its outcome.
pub async fn invoke(router: &RpcRouter, method: String, req: Request<Body>) -> Response {
    let client_ip = ClientIp::from_request(&req);
    let (parts, body) = req.into_parts();

    let request = match decode_body(body).await {
        Ok(request) => request,
        Err(e) => return error_response(&e.to_wire_error()),
    };

    let mut call = Call::new(method, request).with_metadata(Metadata::from(parts.headers));
    call.extensions_mut().insert(client_ip);
    if let Some(id) = parts.extensions.get::<RequestId>() {
        call.extensions_mut().insert(id.clone());
    }

    match router.handle(call).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => error_response(&error),
    }
}

async fn decode_body(body: Body) -> Result<Value, AppError> {
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::invalid_argument(format!("Invalid request body: {e}")))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::invalid_argument(format!("Invalid request body: {e}")))
}

/// Render a wire error as an HTTP response with its presentation status.
#[must_use]
pub fn error_response(error: &WireError) -> Response {
    let body = if error.code == RpcStatus::Unavailable {
        ErrorBody {
            success: false,
            message: UNAVAILABLE_MESSAGE.to_owned(),
            error_code: "SERVICE_UNAVAILABLE",
            grpc_status: error.code.as_i32(),
        }
    } else {
        ErrorBody {
            success: false,
            message: error.client_message().into_owned(),
            error_code: error.code.as_str(),
            grpc_status: error.code.as_i32(),
        }
    };

    let (status, _) = presentation_status(error.code.as_i32());
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(body)).into_response();

    let headers = response.headers_mut();
    headers.insert("grpc-status", HeaderValue::from(error.code.as_i32()));
    if let Some(message) = error.metadata.get(keys::MESSAGE)
        && let Ok(message) = HeaderValue::from_str(message)
    {
        headers.insert("grpc-message", message);
    }
    response
}
