//! Internal-gateway-only services: accept calls only from the internal gateway.
//!
//! The internal gateway has already authenticated the end user, so the
//! identity it forwards in `x-user-*` metadata is trusted once the key matches.

use async_trait::async_trait;
use pipeline_core::{AppError, AuthInfo, Call, CallContext, Metadata, RpcResult, UserRole, keys};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::pipeline::{Interceptor, Next};

pub struct GatewayInterceptor {
    gateway_key: SecretString,
}

impl GatewayInterceptor {
    #[must_use]
    pub const fn new(gateway_key: SecretString) -> Self {
        Self { gateway_key }
    }

    fn is_trusted(&self, call: &Call) -> bool {
        call.metadata()
            .get(keys::INTERNAL_GATEWAY_KEY)
            .is_some_and(|key| {
                key.as_bytes()
                    .ct_eq(self.gateway_key.expose_secret().as_bytes())
                    .into()
            })
    }
}

/// Identity forwarded by the internal gateway, if it sent a valid user id.
fn forwarded_identity(metadata: &Metadata) -> Option<AuthInfo> {
    let user_id = metadata.get(keys::USER_ID)?.parse::<Uuid>().ok()?;
    Some(AuthInfo {
        user_id,
        email: metadata.get(keys::USER_EMAIL).map(str::to_owned),
        role: metadata
            .get(keys::USER_ROLE)
            .and_then(|r| r.parse::<UserRole>().ok()),
        session_id: None,
    })
}

#[async_trait]
impl Interceptor for GatewayInterceptor {
    fn name(&self) -> &'static str {
        "gateway"
    }

    async fn intercept(&self, mut call: Call, ctx: &CallContext, next: Next<'_>) -> RpcResult {
        if !self.is_trusted(&call) {
            warn!(method = ctx.method(), request_id = ctx.request_id(), "Rejected call without internal gateway key");
            return Err(AppError::unauthenticated("Invalid Gateway Key").into());
        }
        if let Some(auth) = forwarded_identity(call.metadata()) {
            debug!(user_id = %auth.user_id, "Forwarded identity");
            call.extensions_mut().insert(auth);
        }
        next.run(call).await
    }
}
