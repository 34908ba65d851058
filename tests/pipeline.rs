//! Behavioral properties of the call pipeline, exercised through the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline_core::{AppError, JwtValidator, RpcError, StatusCode, UserRole, keys};
use rpc_pipeline::interceptors::{
    AuthConfig, AuthInterceptor, KeyStrategy, RateLimitConfig, RateLimitInterceptor,
};
use rpc_pipeline::services::User;
use rpc_pipeline::startup::build_chain;
use rpc_pipeline::store::{CounterStore, MemoryStore, StoreError};
use rpc_pipeline::{Call, CallContext, Chain, Completion, Interceptor, MethodTable, Next, RpcResult};
use secrecy::SecretString;
use serde_json::{Value, json};
use uuid::Uuid;

const API_KEY: &str = "gateway-secret-key";
const GATEWAY_ID: &str = "gateway-1";
const JWT_SECRET: &str = "integration-test-secret-that-is-32b";

fn gateway_call(method: &str) -> Call {
    Call::new(method, Value::Null)
        .with_header(keys::API_KEY, API_KEY)
        .with_header(keys::GATEWAY_ID, GATEWAY_ID)
}

fn validator() -> JwtValidator {
    JwtValidator::new(&SecretString::from(JWT_SECRET))
}

fn auth() -> AuthInterceptor {
    AuthInterceptor::new(
        AuthConfig::new(SecretString::from(API_KEY), GATEWAY_ID, ["ping"]),
        Arc::new(validator()),
    )
}

fn counting_table(hits: &Arc<AtomicUsize>) -> MethodTable {
    let ping_hits = Arc::clone(hits);
    let secret_hits = Arc::clone(hits);
    MethodTable::new()
        .route("ping", move |_call: Call| {
            ping_hits.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, RpcError>(json!({ "ok": true })) }
        })
        .route("Secret", move |_call: Call| {
            secret_hits.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, RpcError>(json!("classified")) }
        })
}

/// Records its label, then either forwards or stops the chain.
struct Step {
    label: &'static str,
    forward: bool,
    log: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl Interceptor for Step {
    fn name(&self) -> &'static str {
        self.label
    }

    async fn intercept(&self, call: Call, _ctx: &CallContext, next: Next<'_>) -> RpcResult {
        self.log.lock().push(self.label);
        if self.forward {
            next.run(call).await
        } else {
            Err(AppError::permission_denied(self.label).into())
        }
    }
}

struct ResumesTwice;

#[async_trait]
impl Interceptor for ResumesTwice {
    fn name(&self) -> &'static str {
        "resumes_twice"
    }

    async fn intercept(&self, call: Call, _ctx: &CallContext, next: Next<'_>) -> RpcResult {
        next.run(call.clone()).await?;
        next.run(call).await
    }
}

struct BrokenStore;

#[async_trait]
impl CounterStore for BrokenStore {
    async fn increment(&self, _key: &str) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn has_expiry(&self, _key: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn every_call_completes_exactly_once() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Chain::default().with(auth()).wrap(counting_table(&hits));

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let calls = [
        gateway_call("ping"),
        gateway_call("Secret"),
        gateway_call("Missing"),
        Call::new("ping", Value::Null),
    ];
    let mut receivers = Vec::new();
    for call in calls {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let delivered = Arc::clone(&delivered);
        let sink = Completion::callback(call.method(), move |outcome| {
            delivered.lock().push(outcome.is_ok());
            let _ = tx.send(());
        });
        router.dispatch(call, sink);
        receivers.push(rx);
    }
    for rx in receivers {
        rx.await.unwrap();
    }

    let mut delivered = delivered.lock().clone();
    delivered.sort_unstable();
    assert_eq!(delivered, vec![false, false, false, true]);
}

#[tokio::test]
async fn short_circuit_stops_the_rest_of_the_chain() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let hits = Arc::new(AtomicUsize::new(0));
    let step = |label, forward| Step { label, forward, log: Arc::clone(&log) };

    let router = Chain::default()
        .with(step("first", true))
        .with(step("second", false))
        .with(step("third", true))
        .wrap(counting_table(&hits));

    let err = router.handle(gateway_call("ping")).await.unwrap_err();
    assert_eq!(err.code, StatusCode::PermissionDenied);
    assert_eq!(*log.lock(), vec!["first", "second"]);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn handler_runs_only_when_every_interceptor_forwards() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let hits = Arc::new(AtomicUsize::new(0));
    let step = |label| Step { label, forward: true, log: Arc::clone(&log) };

    let router = Chain::default()
        .with(step("first"))
        .with(step("second"))
        .with(step("third"))
        .wrap(counting_table(&hits));

    assert_eq!(router.handle(gateway_call("ping")).await.unwrap(), json!({ "ok": true }));
    assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resuming_twice_is_detected() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Chain::default().with(ResumesTwice).wrap(counting_table(&hits));

    let err = router.handle(gateway_call("ping")).await.unwrap_err();
    assert_eq!(err.code, StatusCode::Internal);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn limiter_denies_the_call_after_the_limit_and_resets_after_the_window() {
    let hits = Arc::new(AtomicUsize::new(0));
    let limits = RateLimitConfig {
        limit: 3,
        window: Duration::from_secs(60),
        ..RateLimitConfig::default()
    };
    let router = Chain::default()
        .with(RateLimitInterceptor::new(Arc::new(MemoryStore::new()), limits))
        .wrap(counting_table(&hits));

    for _ in 0..3 {
        assert!(router.handle(gateway_call("ping")).await.is_ok());
    }
    let err = router.handle(gateway_call("ping")).await.unwrap_err();
    assert_eq!(err.code, StatusCode::ResourceExhausted);
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(router.handle(gateway_call("ping")).await.is_ok());
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn limiter_fails_open_when_the_store_is_down() {
    let hits = Arc::new(AtomicUsize::new(0));
    let limits = RateLimitConfig {
        limit: 1,
        ..RateLimitConfig::default()
    };
    let router = Chain::default()
        .with(RateLimitInterceptor::new(Arc::new(BrokenStore), limits))
        .wrap(counting_table(&hits));

    for _ in 0..5 {
        assert!(router.handle(gateway_call("ping")).await.is_ok());
    }
    assert_eq!(hits.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn per_user_limiter_ignores_rotating_caller_supplied_ids() {
    let hits = Arc::new(AtomicUsize::new(0));
    let limits = RateLimitConfig {
        limit: 1,
        window: Duration::from_secs(60),
        key_strategy: KeyStrategy::User,
    };
    let router = build_chain(
        AuthConfig::new(SecretString::from(API_KEY), GATEWAY_ID, ["ping"]),
        Arc::new(validator()),
        limits,
        Arc::new(MemoryStore::new()),
    )
    .wrap(counting_table(&hits));

    let mut admitted = 0;
    for i in 0..5 {
        let call = gateway_call("ping").with_header(keys::USER_ID, &format!("spoof-{i}"));
        if router.handle(call).await.is_ok() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn public_methods_skip_tokens_and_private_ones_require_them() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Chain::default().with(auth()).wrap(counting_table(&hits));

    assert_eq!(router.handle(gateway_call("ping")).await.unwrap(), json!({ "ok": true }));

    let err = router.handle(gateway_call("Secret")).await.unwrap_err();
    assert_eq!(err.code, StatusCode::Unauthenticated);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let user = User {
        id: Uuid::new_v4(),
        name: "Ada".to_string(),
        email: "ada@example.com".to_string(),
        role: UserRole::User,
        created_at: chrono::Utc::now(),
    };
    let token = validator()
        .issue(&user, None, chrono::Duration::minutes(5))
        .unwrap();
    let call = gateway_call("Secret").with_header(keys::SERVICE_TOKEN, &format!("Bearer {token}"));
    assert_eq!(router.handle(call).await.unwrap(), json!("classified"));
}

#[tokio::test]
async fn invalid_api_key_is_invalid_argument_for_every_method() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Chain::default().with(auth()).wrap(counting_table(&hits));

    for method in ["ping", "Secret"] {
        let call = Call::new(method, Value::Null)
            .with_header(keys::API_KEY, "wrong-key")
            .with_header(keys::GATEWAY_ID, GATEWAY_ID);
        let err = router.handle(call).await.unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidArgument);
        assert_eq!(err.message, "Invalid API key");
    }
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn application_errors_keep_their_code_and_unexpected_ones_are_masked() {
    let table = MethodTable::new()
        .route("Create", |_call: Call| async {
            Err::<Value, _>(RpcError::from(AppError::conflict("User", "email", "ada@example.com")))
        })
        .route("Explode", |_call: Call| async {
            Err::<Value, _>(RpcError::Unexpected(anyhow::anyhow!("db password is hunter2")))
        });
    let router = Chain::default().wrap(table);

    let err = router.handle(Call::new("Create", Value::Null)).await.unwrap_err();
    assert_eq!(err.code, StatusCode::AlreadyExists);
    assert_eq!(err.message, "User already exists");

    let err = router.handle(Call::new("Explode", Value::Null)).await.unwrap_err();
    assert_eq!(err.code, StatusCode::Internal);
    assert_eq!(err.message, pipeline_core::INTERNAL_ERROR_MESSAGE);
    assert!(!format!("{err:?}").contains("hunter2"));
}
