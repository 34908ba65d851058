//! Telemetry setup for structured logging, OpenTelemetry tracing and Prometheus metrics.
//!
//! This crate provides the observability stack of the RPC pipeline:
//! - **Logging**: `tracing` subscriber, JSON or compact console output
//! - **Tracing**: optional OpenTelemetry export
//! - **Metrics**: Prometheus recorder backing the `metrics` facade
//!
//! # Features
//! - `otlp` (default): OpenTelemetry OTLP exporter
//! - `prometheus` (default): Prometheus metrics exporter

#[cfg(feature = "otlp")]
use std::time::Duration;

use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "prometheus")]
pub use metrics_exporter_prometheus::PrometheusHandle;

#[cfg(feature = "otlp")]
use opentelemetry::KeyValue;
#[cfg(feature = "otlp")]
use opentelemetry::trace::TracerProvider as _;
#[cfg(feature = "otlp")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otlp")]
use opentelemetry_sdk::{
    Resource,
    trace::{Sampler, SdkTracerProvider},
};

/// Service name reported to exporters.
pub const SERVICE_NAME: &str = "rpc-pipeline";

/// Noisy dependencies capped regardless of the configured level.
const DEPENDENCY_DIRECTIVES: [&str; 4] = ["tower=info", "h2=info", "hyper=info", "redis=info"];

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter directive: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
    #[error("failed to create OTLP exporter: {0}")]
    Exporter(String),
    #[error("failed to install Prometheus recorder: {0}")]
    Recorder(String),
}

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub log_level: String,
    /// Use JSON log format
    pub json_logs: bool,
    /// OpenTelemetry OTLP endpoint (optional)
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            json_logs: true,
            otlp_endpoint: None,
        }
    }
}

impl TelemetryConfig {
    /// Parsed log level; unrecognised values fall back to INFO.
    #[must_use]
    #[allow(clippy::match_same_arms)]
    pub fn level(&self) -> Level {
        match self.log_level.to_uppercase().as_str() {
            "TRACE" => Level::TRACE,
            "DEBUG" => Level::DEBUG,
            "WARN" => Level::WARN,
            "ERROR" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Active telemetry handles that need graceful shutdown.
#[must_use = "dropping the guard without shutdown loses buffered spans"]
pub struct TelemetryGuard {
    #[cfg(feature = "otlp")]
    otel_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Flush and shut down exporters.
    pub fn shutdown(self) {
        #[cfg(feature = "otlp")]
        if let Some(provider) = self.otel_provider
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry provider: {e}");
        }
    }
}

/// Install the Prometheus recorder and return the handle for the /metrics endpoint.
///
/// # Errors
/// Fails if a global metrics recorder is already installed.
#[cfg(feature = "prometheus")]
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::Recorder(e.to_string()))
}

/// Initialize OpenTelemetry tracing with OTLP exporter.
///
/// Returns `Ok(None)` if OTLP endpoint is not configured.
#[cfg(feature = "otlp")]
fn init_opentelemetry(
    otlp_endpoint: Option<&str>,
) -> Result<Option<SdkTracerProvider>, TelemetryError> {
    let Some(endpoint) = otlp_endpoint else {
        return Ok(None);
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

    let resource = Resource::builder()
        .with_attributes([KeyValue::new("service.name", SERVICE_NAME)])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(resource)
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());

    Ok(Some(provider))
}

fn env_filter(level: Level) -> Result<EnvFilter, TelemetryError> {
    DEPENDENCY_DIRECTIVES.iter().try_fold(
        EnvFilter::from_default_env().add_directive(level.into()),
        |filter, directive| Ok(filter.add_directive(directive.parse()?)),
    )
}

/// Setup complete logging/tracing stack.
///
/// - Console logging (JSON or human-readable)
/// - `OpenTelemetry` tracing (if OTLP endpoint configured)
///
/// Returns a guard that should be kept alive for the application lifetime.
/// Call `shutdown()` on the guard for graceful shutdown.
///
/// # Errors
/// Fails on an invalid filter, a broken exporter endpoint, or when a global
/// subscriber is already installed.
pub fn setup_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = env_filter(config.level())?;

    #[cfg(feature = "otlp")]
    let otel_provider = init_opentelemetry(config.otlp_endpoint.as_deref())?;

    let fmt_layer = if config.json_logs {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_timer(ChronoLocal::new("%H:%M:%S%.3f".to_string()))
            .compact()
            .boxed()
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    #[cfg(feature = "otlp")]
    {
        let otel_layer = otel_provider.as_ref().map(|provider| {
            let tracer = provider.tracer(SERVICE_NAME);
            tracing_opentelemetry::layer().with_tracer(tracer)
        });
        registry.with(otel_layer).try_init()?;
    }

    #[cfg(not(feature = "otlp"))]
    registry.try_init()?;

    Ok(TelemetryGuard {
        #[cfg(feature = "otlp")]
        otel_provider,
    })
}
