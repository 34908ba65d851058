//! Server startup and wiring.

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderName, Request};
#[cfg(feature = "prometheus")]
use pipeline_telemetry::PrometheusHandle;
use pipeline_core::{JwtValidator, TokenVerifier, keys};
use secrecy::SecretString;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{Level, info, warn};

use crate::config::Config;
use crate::interceptors::{
    AuthConfig, AuthInterceptor, ErrorInterceptor, GatewayInterceptor, KeyStrategy,
    LoggingInterceptor, RateLimitConfig, RateLimitInterceptor,
};
use crate::middleware::RequestIdLayer;
use crate::pipeline::{Chain, Interceptor, Router, RpcService};
use crate::routes::rest_routes;
use crate::services::{PingService, UsersService};
use crate::store::{CounterStore, MemoryStore};

/// Application state shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Gateway-facing pipeline.
    pub router: Router,
    /// Internal-gateway pipeline, when an internal key is configured.
    pub internal: Option<Router>,
    pub store: Arc<dyn CounterStore>,
    #[cfg(feature = "prometheus")]
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    #[cfg(feature = "prometheus")]
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Counter store for the rate limiter: Redis when configured, in-memory otherwise.
///
/// # Errors
/// Fails if a Redis URL is configured and the connection cannot be set up.
pub async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn CounterStore>> {
    #[cfg(feature = "redis")]
    if let Some(url) = &config.redis_url {
        let store = crate::store::RedisStore::connect(url).await?;
        info!("Rate-limit counters in Redis");
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "redis"))]
    if config.redis_url.is_some() {
        warn!("REDIS_URL is set but the redis feature is disabled");
    }

    warn!("Rate-limit counters are process-local; limits are per instance");
    let store = Arc::new(MemoryStore::new());
    spawn_purge(Arc::clone(&store), config.rate_limit_config().window);
    Ok(store)
}

/// Drop expired in-memory counters once per window.
fn spawn_purge(store: Arc<MemoryStore>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "Purged expired rate-limit counters");
            }
        }
    });
}

/// Gateway-facing chain: error boundary, logging, then rate limiting and
/// auth in the order the bucket key requires.
#[must_use]
pub fn build_chain(
    auth: AuthConfig,
    verifier: Arc<dyn TokenVerifier>,
    limits: RateLimitConfig,
    store: Arc<dyn CounterStore>,
) -> Chain {
    let strategy = limits.key_strategy;
    let rate_limit: Arc<dyn Interceptor> = Arc::new(RateLimitInterceptor::new(store, limits));
    let auth: Arc<dyn Interceptor> = Arc::new(AuthInterceptor::new(auth, verifier));

    let mut interceptors: Vec<Arc<dyn Interceptor>> =
        vec![Arc::new(ErrorInterceptor::new()), Arc::new(LoggingInterceptor::new())];
    match strategy {
        KeyStrategy::ApiKey => interceptors.extend([rate_limit, auth]),
        // Per-user buckets need the verified identity.
        KeyStrategy::User => interceptors.extend([auth, rate_limit]),
    }
    Chain::new(interceptors)
}

/// Chain for the internal gateway: the shared key replaces per-user tokens.
#[must_use]
pub fn build_internal_chain(key: SecretString) -> Chain {
    Chain::default()
        .with(ErrorInterceptor::new())
        .with(LoggingInterceptor::new())
        .with(GatewayInterceptor::new(key))
}

/// Build the pipelines and shared state.
///
/// # Errors
/// Fails if the counter store cannot be set up.
pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let store = build_store(config).await?;
    let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtValidator::new(&config.jwt_secret_key));

    let ping = Arc::new(PingService);
    let users = Arc::new(UsersService::new());

    let chain = build_chain(
        config.auth_config(),
        verifier,
        config.rate_limit_config(),
        Arc::clone(&store),
    );
    info!(interceptors = ?chain.names().collect::<Vec<_>>(), "Pipeline assembled");
    let router = chain.wrap(Arc::clone(&ping).method_table().merge(Arc::clone(&users).method_table()));

    // Both pipelines share one directory.
    let internal = config.internal_gateway_key.clone().map(|key| {
        info!("Internal gateway routes enabled");
        build_internal_chain(key).wrap(ping.method_table().merge(users.method_table()))
    });

    Ok(AppState {
        router,
        internal,
        store,
        #[cfg(feature = "prometheus")]
        metrics: None,
    })
}

/// Wrap the REST routes in the HTTP middleware stack.
pub fn build_app(config: &Config, state: AppState) -> axum::Router {
    let cors = build_cors(config.cors_allow_origins.as_deref());

    let middleware = ServiceBuilder::new()
        .layer(RequestIdLayer)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<_>| {
                    tracing::info_span!(
                        "request",
                        method = %req.method(),
                        uri = %req.uri(),
                        request_id = tracing::field::Empty,
                    )
                })
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(TimeoutLayer::with_status_code(
            http::StatusCode::REQUEST_TIMEOUT,
            config.request_timeout(),
        ))
        .layer(cors);

    rest_routes(state).layer(middleware)
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = match origins {
        Some(o) if o.trim() != "*" => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            CorsLayer::new().allow_origin(origins)
        }
        _ => CorsLayer::permissive(),
    };

    cors.allow_headers(Any)
        .expose_headers([
            HeaderName::from_static("grpc-status"),
            HeaderName::from_static("grpc-message"),
            HeaderName::from_static(keys::REQUEST_ID),
        ])
        .allow_methods(Any)
        .max_age(Duration::from_secs(3600))
}
