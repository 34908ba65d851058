//! Service token issuing and verification.
//!
//! The pipeline only depends on the [`TokenVerifier`] capability. The HS256
//! [`JwtValidator`] is the implementation used by the service binary; tests and
//! other deployments can plug in their own verifier.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// JWT issuer identifier.
const ISSUER: &str = "auth-service";
/// JWT audience identifier.
const AUDIENCE: &str = "rpc-pipeline";

/// Trait for types that can be used as JWT subjects.
pub trait JwtSubject {
    fn user_id(&self) -> Uuid;
    fn email(&self) -> Option<&str>;
    fn role(&self) -> Option<UserRole>;
}

/// User role carried in service tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[serde(alias = "admin")]
    Administrator,
    User,
}

impl UserRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Administrator => "administrator",
            Self::User => "user",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "administrator" | "admin" => Ok(Self::Administrator),
            "user" => Ok(Self::User),
            _ => Err(format!("Unknown role: {s}")),
        }
    }
}

/// Identity decoded from a verified service token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfo {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Option<UserRole>,
    pub session_id: Option<String>,
}

impl AuthInfo {
    #[inline]
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Some(UserRole::Administrator))
    }

    /// Check if user can access the target user's resource.
    #[inline]
    #[must_use]
    pub fn can_access(&self, target_user_id: Uuid) -> bool {
        self.user_id == target_user_id || self.is_admin()
    }
}

/// JWT claims structure following RFC 7519.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

/// Token verification errors.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("invalid claim: {0}")]
    InvalidClaim(&'static str),
    #[error("token verifier unavailable: {0}")]
    Unavailable(String),
}

impl TryFrom<Claims> for AuthInfo {
    type Error = JwtError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let role = claims
            .role
            .as_deref()
            .map(str::parse::<UserRole>)
            .transpose()
            .map_err(|_| JwtError::InvalidClaim("role"))?;

        Ok(Self {
            user_id: Uuid::parse_str(&claims.sub).map_err(|_| JwtError::InvalidClaim("sub"))?,
            email: claims.email,
            role,
            session_id: claims.sid,
        })
    }
}

/// Capability: turn a service token into an identity, or fail.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<AuthInfo, JwtError>;
}

/// Pre-compiled HS256 validator with cached encoding/decoding keys.
///
/// Cloneable via `Arc`. Creating keys is expensive, so this caches them for
/// the lifetime of the application.
#[derive(Clone)]
pub struct JwtValidator {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    validation: Validation,
}

impl JwtValidator {
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        let secret_bytes = secret.expose_secret().as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[AUDIENCE]);
        validation.set_issuer(&[ISSUER]);
        validation.validate_exp = true;
        validation.validate_nbf = true;

        Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret_bytes)),
            decoding_key: Arc::new(DecodingKey::from_secret(secret_bytes)),
            validation,
        }
    }

    /// Issue a service token for `subject`.
    ///
    /// # Errors
    /// Returns an internal error if encoding fails.
    pub fn issue<T: JwtSubject>(
        &self,
        subject: &T,
        session_id: Option<&str>,
        ttl: Duration,
    ) -> Result<String, AppError> {
        let now = Utc::now();

        let claims = Claims {
            sub: subject.user_id().to_string(),
            aud: AUDIENCE.to_string(),
            iss: ISSUER.to_string(),
            jti: Uuid::new_v4().to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            email: subject.email().map(str::to_owned),
            role: subject.role().map(|r| r.as_str().to_owned()),
            sid: session_id.map(str::to_owned),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!(error = %e, "JWT encoding failed");
            AppError::internal()
        })
    }

    /// Validate a JWT and extract auth info.
    ///
    /// # Errors
    /// Returns [`JwtError`] for bad signatures, expired tokens or malformed claims.
    pub fn validate(&self, token: &str) -> Result<AuthInfo, JwtError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| JwtError::InvalidToken)?;

        token_data.claims.try_into()
    }
}

#[async_trait]
impl TokenVerifier for JwtValidator {
    async fn verify(&self, token: &str) -> Result<AuthInfo, JwtError> {
        self.validate(token)
    }
}
