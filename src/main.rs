//! RPC pipeline service: JSON-over-HTTP binding of the unary call pipeline.

use std::net::SocketAddr;

use pipeline_telemetry::setup_telemetry;
use rpc_pipeline::config::Config;
use rpc_pipeline::startup::{build_app, build_state};
use tokio::signal;
use tracing::{error, info};

/// Build version (injected at compile time or default)
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init()?;
    let telemetry = setup_telemetry(&config.telemetry_config())?;

    info!(
        version = VERSION,
        address = %config.rpc_address,
        rate_limit = config.rate_limit,
        rate_limit_window_secs = config.rate_limit_window_secs,
        otlp = config.otlp_endpoint.is_some(),
        pid = std::process::id(),
        "Starting rpc-pipeline"
    );

    let addr: SocketAddr = config.rpc_address.parse()?;
    let state = build_state(&config).await?;

    #[cfg(feature = "prometheus")]
    let state = match pipeline_telemetry::init_metrics() {
        Ok(handle) => state.with_metrics(handle),
        Err(e) => {
            error!(error = %e, "Metrics disabled");
            state
        }
    };

    let app = build_app(&config, state);

    info!(address = %addr, "Server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    telemetry.shutdown();
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
