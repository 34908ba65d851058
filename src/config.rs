//! Configuration with validation at startup.

use std::time::Duration;

use clap::Parser;
use pipeline_telemetry::TelemetryConfig;
use secrecy::{ExposeSecret, SecretString};

use crate::interceptors::{AuthConfig, KeyStrategy, RateLimitConfig};

/// Minimum required JWT secret length for security (256 bits).
const MIN_JWT_SECRET_LEN: usize = 32;
/// Minimum length for gateway shared secrets.
const MIN_GATEWAY_KEY_LEN: usize = 16;

/// RPC pipeline service configuration.
///
/// All values can be set via environment variables or CLI arguments.
#[derive(Debug, Clone, Parser)]
#[command(name = "rpc-pipeline", about = "Unary RPC pipeline service")]
pub struct Config {
    /// Server address
    #[arg(long, env = "RPC_ADDRESS", default_value = "0.0.0.0:50051")]
    pub rpc_address: String,

    /// CORS allowed origins (comma-separated, or "*" for any)
    #[arg(long, env = "CORS_ALLOW_ORIGINS")]
    pub cors_allow_origins: Option<String>,

    /// Request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Shared secret the gateway presents in `x-api-key` (min 16 chars)
    #[arg(long, env = "GATEWAY_API_KEY")]
    pub gateway_api_key: SecretString,

    /// Expected `x-gateway-id`
    #[arg(long, env = "GATEWAY_ID")]
    pub gateway_id: String,

    /// Secret for the internal gateway; enables the internal-only routes
    #[arg(long, env = "INTERNAL_GATEWAY_KEY")]
    pub internal_gateway_key: Option<SecretString>,

    /// JWT secret key for service tokens (min 32 chars)
    #[arg(long, env = "JWT_SECRET_KEY")]
    pub jwt_secret_key: SecretString,

    /// Methods callable without a service token (comma-separated)
    #[arg(long, env = "PUBLIC_METHODS", value_delimiter = ',', default_value = "ping")]
    pub public_methods: Vec<String>,

    /// Calls admitted per rate-limit window
    #[arg(long, env = "RATE_LIMIT", default_value = "100")]
    pub rate_limit: u64,

    /// Rate-limit window in seconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value = "60")]
    pub rate_limit_window_secs: u64,

    /// Rate-limit bucket key
    #[arg(long, env = "RATE_LIMIT_KEY", value_enum, default_value = "api-key")]
    pub rate_limit_key: KeyStrategy,

    /// Redis URL for shared rate-limit counters (in-memory when unset)
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(long, env = "LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    /// Use JSON log format
    #[arg(long, env = "JSON_LOGS", default_value = "true")]
    pub json_logs: bool,

    /// OpenTelemetry OTLP endpoint
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("JWT secret must be at least {MIN_JWT_SECRET_LEN} characters")]
    JwtSecretTooShort,
    #[error("Gateway API key must be at least {MIN_GATEWAY_KEY_LEN} characters")]
    GatewayKeyTooShort,
    #[error("Internal gateway key must be at least {MIN_GATEWAY_KEY_LEN} characters")]
    InternalGatewayKeyTooShort,
    #[error("Gateway id must not be empty")]
    EmptyGatewayId,
    #[error("Rate limit must be > 0")]
    InvalidRateLimit,
    #[error("Rate limit window must be > 0")]
    InvalidRateLimitWindow,
    #[error("Request timeout must be > 0")]
    InvalidRequestTimeout,
}

impl Config {
    /// Parse and validate configuration.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a value fails validation.
    pub fn init() -> anyhow::Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret_key.expose_secret().len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::JwtSecretTooShort);
        }
        if self.gateway_api_key.expose_secret().len() < MIN_GATEWAY_KEY_LEN {
            return Err(ConfigError::GatewayKeyTooShort);
        }
        if let Some(key) = &self.internal_gateway_key
            && key.expose_secret().len() < MIN_GATEWAY_KEY_LEN
        {
            return Err(ConfigError::InternalGatewayKeyTooShort);
        }
        if self.gateway_id.trim().is_empty() {
            return Err(ConfigError::EmptyGatewayId);
        }
        if self.rate_limit == 0 {
            return Err(ConfigError::InvalidRateLimit);
        }
        if self.rate_limit_window_secs == 0 {
            return Err(ConfigError::InvalidRateLimitWindow);
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidRequestTimeout);
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(
            self.gateway_api_key.clone(),
            self.gateway_id.trim(),
            self.public_methods
                .iter()
                .map(|m| m.trim())
                .filter(|m| !m.is_empty()),
        )
    }

    #[must_use]
    pub const fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            limit: self.rate_limit,
            window: Duration::from_secs(self.rate_limit_window_secs),
            key_strategy: self.rate_limit_key,
        }
    }

    #[must_use]
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level.clone(),
            json_logs: self.json_logs,
            otlp_endpoint: self.otlp_endpoint.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config::parse_from([
            "rpc-pipeline",
            "--gateway-api-key",
            "gateway_secret_key_16",
            "--gateway-id",
            "gateway-1",
            "--jwt-secret-key",
            "this_is_a_very_long_secret_key_32",
        ])
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn defaults_are_applied() {
        let config = test_config();
        assert_eq!(config.rpc_address, "0.0.0.0:50051");
        assert_eq!(config.public_methods, vec!["ping"]);
        assert_eq!(config.rate_limit_key, KeyStrategy::ApiKey);

        let limits = config.rate_limit_config();
        assert_eq!(limits.limit, 100);
        assert_eq!(limits.window, Duration::from_secs(60));
    }

    #[test]
    fn public_methods_are_comma_separated() {
        let config = Config::parse_from([
            "rpc-pipeline",
            "--gateway-api-key",
            "gateway_secret_key_16",
            "--gateway-id",
            "gateway-1",
            "--jwt-secret-key",
            "this_is_a_very_long_secret_key_32",
            "--public-methods",
            "ping, CreateUser",
            "--rate-limit-key",
            "user",
        ]);
        let auth = config.auth_config();
        assert!(auth.is_public("ping"));
        assert!(auth.is_public("CreateUser"));
        assert_eq!(config.rate_limit_key, KeyStrategy::User);
    }

    #[test]
    fn jwt_secret_too_short_fails() {
        let mut config = test_config();
        config.jwt_secret_key = SecretString::from("short");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::JwtSecretTooShort)
        ));
    }

    #[test]
    fn gateway_key_too_short_fails() {
        let mut config = test_config();
        config.gateway_api_key = SecretString::from("short");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::GatewayKeyTooShort)
        ));
    }

    #[test]
    fn zero_rate_limit_fails() {
        let mut config = test_config();
        config.rate_limit = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRateLimit)));
    }
}
