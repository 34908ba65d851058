//! Gateway credential check and per-user service token verification.
//!
//! Every call must carry the gateway's API key and identifier. Calls to
//! methods outside the public allow-list must also carry a service token;
//! the verified identity is written back into the call for downstream use.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use pipeline_core::{AppError, AuthInfo, Call, CallContext, Metadata, RpcResult, TokenVerifier, keys};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tracing::{Span, debug, warn};

use crate::pipeline::{Interceptor, Next};

const BEARER_PREFIX: &str = "Bearer ";

/// Constructor-injected auth settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Shared secret presented by the gateway in `x-api-key`.
    pub api_key: SecretString,
    /// Expected `x-gateway-id`.
    pub gateway_id: String,
    /// Methods that skip token verification. Entries match either the full
    /// method name or its last `/` segment.
    pub public_methods: HashSet<String>,
}

impl AuthConfig {
    pub fn new(
        api_key: SecretString,
        gateway_id: impl Into<String>,
        public_methods: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            api_key,
            gateway_id: gateway_id.into(),
            public_methods: public_methods.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn is_public(&self, method: &str) -> bool {
        if self.public_methods.contains(method) {
            return true;
        }
        method
            .rsplit('/')
            .next()
            .is_some_and(|name| !name.is_empty() && self.public_methods.contains(name))
    }
}

pub struct AuthInterceptor {
    config: AuthConfig,
    verifier: Arc<dyn TokenVerifier>,
}

impl AuthInterceptor {
    #[must_use]
    pub fn new(config: AuthConfig, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { config, verifier }
    }

    fn check_gateway(&self, metadata: &Metadata) -> Result<(), AppError> {
        let presented = metadata.get(keys::API_KEY).unwrap_or_default();
        let expected = self.config.api_key.expose_secret();
        if !bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
            return Err(AppError::invalid_argument("Invalid API key"));
        }

        if metadata.get(keys::GATEWAY_ID) != Some(self.config.gateway_id.as_str()) {
            return Err(AppError::invalid_argument("Invalid gateway identifier"));
        }
        Ok(())
    }

    async fn authenticate(&self, metadata: &Metadata) -> Result<AuthInfo, AppError> {
        let token = metadata
            .get(keys::SERVICE_TOKEN)
            .map(|raw| raw.strip_prefix(BEARER_PREFIX).unwrap_or(raw).trim())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::unauthenticated("Missing service token"))?;

        self.verifier.verify(token).await.map_err(|e| {
            debug!(error = %e, "Service token rejected");
            AppError::unauthenticated("Invalid service token")
        })
    }
}

/// Drop identity metadata supplied by the caller. Only a verified token may
/// put it back.
fn strip_identity(metadata: &mut Metadata) {
    for key in [keys::USER_ID, keys::USER_EMAIL, keys::USER_ROLE] {
        metadata.remove(key);
    }
}

/// Write the verified identity into metadata and extensions.
fn inject_identity(call: &mut Call, auth: &AuthInfo) {
    let metadata = call.metadata_mut();
    let user_id = auth.user_id.to_string();
    let entries = [
        (keys::USER_ID, Some(user_id.as_str())),
        (keys::USER_EMAIL, auth.email.as_deref()),
        (keys::USER_ROLE, auth.role.map(|r| r.as_str())),
    ];
    for (key, value) in entries {
        if let Some(value) = value
            && let Err(e) = metadata.insert(key, value)
        {
            warn!(key, error = %e, "Skipping identity metadata");
        }
    }

    call.extensions_mut().insert(auth.clone());
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn intercept(&self, mut call: Call, ctx: &CallContext, next: Next<'_>) -> RpcResult {
        if let Err(e) = self.check_gateway(call.metadata()) {
            warn!(method = ctx.method(), request_id = ctx.request_id(), "{}", e.message());
            return Err(e.into());
        }
        strip_identity(call.metadata_mut());

        if self.config.is_public(ctx.method()) {
            debug!(method = ctx.method(), "Public method - skipping token verification");
            return next.run(call).await;
        }

        let auth = self.authenticate(call.metadata()).await?;
        Span::current().record("user_id", auth.user_id.to_string());
        debug!(user_id = %auth.user_id, role = ?auth.role, "Authenticated");

        inject_identity(&mut call, &auth);
        next.run(call).await
    }
}

#[cfg(test)]
mod tests {
    use pipeline_core::{JwtError, StatusCode, UserRole};
    use serde_json::{Value, json};
    use uuid::Uuid;

    use super::*;
    use crate::pipeline::{Chain, MethodTable, Router};

    const API_KEY: &str = "gateway-secret-key-0001";
    const GATEWAY_ID: &str = "gateway-1";
    const GOOD_TOKEN: &str = "good-token";

    struct StaticVerifier {
        user_id: Uuid,
    }

    #[async_trait]
    impl TokenVerifier for StaticVerifier {
        async fn verify(&self, token: &str) -> Result<AuthInfo, JwtError> {
            if token != GOOD_TOKEN {
                return Err(JwtError::InvalidToken);
            }
            Ok(AuthInfo {
                user_id: self.user_id,
                email: Some("ada@example.com".to_string()),
                role: Some(UserRole::Administrator),
                session_id: None,
            })
        }
    }

    fn router(user_id: Uuid) -> Router {
        let config = AuthConfig::new(SecretString::from(API_KEY), GATEWAY_ID, ["ping"]);
        let verifier = Arc::new(StaticVerifier { user_id });
        let echo_metadata = |call: Call| async move {
            let md = call.metadata();
            Ok::<_, pipeline_core::RpcError>(json!({
                "userId": md.get_all(keys::USER_ID),
                "email": md.get(keys::USER_EMAIL),
                "role": md.get(keys::USER_ROLE),
                "hasAuth": call.extensions().get::<AuthInfo>().is_some(),
            }))
        };
        let table = MethodTable::new()
            .route("ping", echo_metadata)
            .route("GetUser", echo_metadata);
        Chain::default()
            .with(AuthInterceptor::new(config, verifier))
            .wrap(table)
    }

    fn gateway_call(method: &str) -> Call {
        Call::new(method, Value::Null)
            .with_header(keys::API_KEY, API_KEY)
            .with_header(keys::GATEWAY_ID, GATEWAY_ID)
    }

    #[test]
    fn public_match_uses_full_name_or_last_segment() {
        let config = AuthConfig::new(SecretString::from(API_KEY), GATEWAY_ID, ["ping"]);
        assert!(config.is_public("ping"));
        assert!(config.is_public("/health.v1.Health/ping"));
        assert!(!config.is_public("GetUser"));
        assert!(!config.is_public("/users.v1.Users/GetUser"));
        assert!(!config.is_public("ping/"));
    }

    #[tokio::test]
    async fn invalid_api_key_rejected_even_for_public_methods() {
        let call = Call::new("ping", Value::Null)
            .with_header(keys::API_KEY, "wrong")
            .with_header(keys::GATEWAY_ID, GATEWAY_ID);
        let err = router(Uuid::new_v4()).handle(call).await.unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidArgument);
        assert_eq!(err.message, "Invalid API key");
    }

    #[tokio::test]
    async fn invalid_gateway_id_rejected() {
        let call = Call::new("ping", Value::Null)
            .with_header(keys::API_KEY, API_KEY)
            .with_header(keys::GATEWAY_ID, "other");
        let err = router(Uuid::new_v4()).handle(call).await.unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidArgument);
        assert_eq!(err.message, "Invalid gateway identifier");
    }

    #[tokio::test]
    async fn public_method_needs_no_token() {
        let out = router(Uuid::new_v4()).handle(gateway_call("ping")).await.unwrap();
        assert_eq!(out["hasAuth"], json!(false));
    }

    #[tokio::test]
    async fn public_method_drops_caller_supplied_identity() {
        let call = gateway_call("ping")
            .with_header(keys::USER_ID, "spoofed")
            .with_header(keys::USER_ROLE, "administrator");
        let out = router(Uuid::new_v4()).handle(call).await.unwrap();
        assert_eq!(out["userId"], json!([]));
        assert_eq!(out["role"], Value::Null);
        assert_eq!(out["hasAuth"], json!(false));
    }

    #[tokio::test]
    async fn protected_method_requires_token() {
        let err = router(Uuid::new_v4())
            .handle(gateway_call("GetUser"))
            .await
            .unwrap_err();
        assert_eq!(err.code, StatusCode::Unauthenticated);
        assert_eq!(err.message, "Missing service token");
    }

    #[tokio::test]
    async fn bad_token_is_unauthenticated() {
        let call = gateway_call("GetUser").with_header(keys::SERVICE_TOKEN, "forged");
        let err = router(Uuid::new_v4()).handle(call).await.unwrap_err();
        assert_eq!(err.code, StatusCode::Unauthenticated);
        assert_eq!(err.message, "Invalid service token");
    }

    #[tokio::test]
    async fn verified_identity_replaces_caller_supplied_values() {
        let user_id = Uuid::new_v4();
        let call = gateway_call("GetUser")
            .with_header(keys::SERVICE_TOKEN, &format!("Bearer {GOOD_TOKEN}"))
            .with_header(keys::USER_ID, "spoofed")
            .with_header(keys::USER_ROLE, "administrator");

        let out = router(user_id).handle(call).await.unwrap();
        assert_eq!(out["userId"], json!([user_id.to_string()]));
        assert_eq!(out["email"], json!("ada@example.com"));
        assert_eq!(out["role"], json!("administrator"));
        assert_eq!(out["hasAuth"], json!(true));
    }
}
