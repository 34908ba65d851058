//! Fixed-window rate limiting over a shared counting store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pipeline_core::{AppError, AuthInfo, Call, CallContext, RpcResult, keys};
use sha2::{Digest, Sha256};
use tracing::{error, warn};

use crate::pipeline::{Interceptor, Next};
use crate::store::{CounterStore, StoreError};

const KEY_PREFIX: &str = "rate_limit:";
const ANONYMOUS: &str = "anonymous";

/// Hex characters of the API key digest kept in bucket names.
const FINGERPRINT_LEN: usize = 16;

/// What a rate-limit bucket is keyed on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum KeyStrategy {
    /// One bucket per `x-api-key`, i.e. per gateway.
    #[default]
    ApiKey,
    /// One bucket per verified user, falling back to the API key.
    User,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Calls admitted per window.
    pub limit: u64,
    pub window: Duration,
    pub key_strategy: KeyStrategy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(60),
            key_strategy: KeyStrategy::ApiKey,
        }
    }
}

/// Non-reversible short form of an API key, safe for logs and store keys.
fn fingerprint(api_key: &str) -> String {
    let digest = hex::encode(Sha256::digest(api_key.as_bytes()));
    digest[..FINGERPRINT_LEN].to_owned()
}

pub struct RateLimitInterceptor {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimitInterceptor {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Bucket name for `call`. Per-user buckets only trust the identity the
    /// auth interceptor verified, never caller metadata.
    fn bucket(&self, call: &Call) -> String {
        if self.config.key_strategy == KeyStrategy::User
            && let Some(auth) = call.extensions().get::<AuthInfo>()
        {
            return format!("{KEY_PREFIX}user:{}", auth.user_id);
        }
        match call.metadata().get(keys::API_KEY).filter(|k| !k.is_empty()) {
            Some(api_key) => format!("{KEY_PREFIX}key:{}", fingerprint(api_key)),
            None => format!("{KEY_PREFIX}{ANONYMOUS}"),
        }
    }

    /// Count the call and decide on the post-increment value.
    ///
    /// A crash between `increment` and `expire`, or a failed first `expire`,
    /// leaves the key without a TTL. The first denied call repairs it, so such
    /// a bucket stays closed for at most one extra window.
    async fn admit(&self, key: &str) -> Result<bool, StoreError> {
        let count = self.store.increment(key).await?;
        if count == 1 {
            self.store.expire(key, self.config.window).await?;
        } else if count > self.config.limit {
            self.restore_expiry(key).await;
        }
        Ok(count <= self.config.limit)
    }

    /// Set the window TTL on `key` if it has none. Errors are logged only;
    /// the call stays denied either way.
    async fn restore_expiry(&self, key: &str) {
        let restored = match self.store.has_expiry(key).await {
            Ok(true) => return,
            Ok(false) => self.store.expire(key, self.config.window).await,
            Err(e) => Err(e),
        };
        match restored {
            Ok(()) => warn!(key, "Rate limit bucket had no expiry, restored it"),
            Err(e) => error!(key, error = %e, "Could not restore rate limit bucket expiry"),
        }
    }
}

#[async_trait]
impl Interceptor for RateLimitInterceptor {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn intercept(&self, call: Call, ctx: &CallContext, next: Next<'_>) -> RpcResult {
        let key = self.bucket(&call);
        match self.admit(&key).await {
            Ok(true) => next.run(call).await,
            Ok(false) => {
                warn!(method = ctx.method(), key, limit = self.config.limit, "Rate limit exceeded");
                Err(AppError::resource_exhausted("Rate limit exceeded").into())
            }
            Err(e) => {
                error!(method = ctx.method(), key, error = %e, "Rate limiter store failed, allowing call");
                next.run(call).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use pipeline_core::{RpcError, StatusCode};
    use uuid::Uuid;
    use serde_json::{Value, json};

    use super::*;
    use crate::pipeline::{Chain, MethodTable, Router};
    use crate::store::MemoryStore;

    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn increment(&self, _key: &str) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn has_expiry(&self, _key: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    /// Memory store whose first `expire` is lost.
    #[derive(Default)]
    struct LosesFirstExpire {
        inner: MemoryStore,
        failed: AtomicBool,
    }

    #[async_trait]
    impl CounterStore for LosesFirstExpire {
        async fn increment(&self, key: &str) -> Result<u64, StoreError> {
            self.inner.increment(key).await
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Unavailable("timeout".into()));
            }
            self.inner.expire(key, ttl).await
        }

        async fn has_expiry(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.has_expiry(key).await
        }
    }

    fn router(store: Arc<dyn CounterStore>, config: RateLimitConfig, hits: &Arc<AtomicUsize>) -> Router {
        let hits = Arc::clone(hits);
        Chain::default()
            .with(RateLimitInterceptor::new(store, config))
            .wrap(MethodTable::new().route("ping", move |_c: Call| {
                hits.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, RpcError>(json!({ "ok": true })) }
            }))
    }

    fn config(limit: u64, key_strategy: KeyStrategy) -> RateLimitConfig {
        RateLimitConfig {
            limit,
            window: Duration::from_secs(60),
            key_strategy,
        }
    }

    fn keyed_call(api_key: &str) -> Call {
        Call::new("ping", Value::Null).with_header(keys::API_KEY, api_key)
    }

    #[tokio::test(start_paused = true)]
    async fn call_over_limit_is_denied_until_window_expires() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = router(Arc::new(MemoryStore::new()), config(2, KeyStrategy::ApiKey), &hits);

        assert!(router.handle(keyed_call("gw")).await.is_ok());
        assert!(router.handle(keyed_call("gw")).await.is_ok());
        let err = router.handle(keyed_call("gw")).await.unwrap_err();
        assert_eq!(err.code, StatusCode::ResourceExhausted);
        assert_eq!(err.message, "Rate limit exceeded");
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(router.handle(keyed_call("gw")).await.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn buckets_are_independent_per_api_key() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = router(Arc::new(MemoryStore::new()), config(1, KeyStrategy::ApiKey), &hits);

        assert!(router.handle(keyed_call("a")).await.is_ok());
        assert!(router.handle(keyed_call("b")).await.is_ok());
        assert!(router.handle(keyed_call("a")).await.is_err());
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = router(Arc::new(BrokenStore), config(1, KeyStrategy::ApiKey), &hits);

        for _ in 0..3 {
            assert!(router.handle(keyed_call("gw")).await.is_ok());
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_first_expiry_is_restored_on_denial() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = router(Arc::new(LosesFirstExpire::default()), config(1, KeyStrategy::ApiKey), &hits);

        // First expire fails: the call is let through.
        assert!(router.handle(keyed_call("gw")).await.is_ok());
        let err = router.handle(keyed_call("gw")).await.unwrap_err();
        assert_eq!(err.code, StatusCode::ResourceExhausted);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(router.handle(keyed_call("gw")).await.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_never_exceed_the_limit() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = router(Arc::new(MemoryStore::new()), config(10, KeyStrategy::ApiKey), &hits);

        let receivers: Vec<_> = (0..64).map(|_| router.spawn(keyed_call("gw"))).collect();
        let mut admitted = 0;
        let mut exhausted = 0;
        for rx in receivers {
            match rx.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(e) => {
                    assert_eq!(e.code, StatusCode::ResourceExhausted);
                    exhausted += 1;
                }
            }
        }
        assert_eq!(admitted, 10);
        assert_eq!(exhausted, 54);
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn bucket_keys_never_contain_the_api_key() {
        let limiter = RateLimitInterceptor::new(Arc::new(MemoryStore::new()), config(1, KeyStrategy::ApiKey));
        let key = limiter.bucket(&keyed_call("gateway-secret"));
        assert_eq!(key, format!("rate_limit:key:{}", fingerprint("gateway-secret")));
        assert!(!key.contains("gateway-secret"));
        assert_eq!(fingerprint("gateway-secret").len(), FINGERPRINT_LEN);
        assert_ne!(fingerprint("a"), fingerprint("b"));
        assert_eq!(limiter.bucket(&Call::new("ping", Value::Null)), "rate_limit:anonymous");
    }

    #[test]
    fn per_user_buckets_ignore_caller_metadata() {
        let per_user = RateLimitInterceptor::new(Arc::new(MemoryStore::new()), config(1, KeyStrategy::User));
        let by_key = format!("rate_limit:key:{}", fingerprint("gw"));

        let spoofed = keyed_call("gw").with_header(keys::USER_ID, "u-1");
        assert_eq!(per_user.bucket(&spoofed), by_key);

        let user_id = Uuid::new_v4();
        let mut verified = keyed_call("gw");
        verified.extensions_mut().insert(AuthInfo {
            user_id,
            email: None,
            role: None,
            session_id: None,
        });
        assert_eq!(per_user.bucket(&verified), format!("rate_limit:user:{user_id}"));
    }
}
