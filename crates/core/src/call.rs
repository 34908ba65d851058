//! One inbound unary invocation and its per-call context.

use chrono::{DateTime, Utc};
use http::Extensions;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::metadata::{Metadata, keys};

/// Maximum accepted length for a caller-supplied request id.
const MAX_REQUEST_ID_LENGTH: usize = 64;

/// An inbound call: method name, metadata and structured payload.
///
/// Interceptors may rewrite metadata and extensions before forwarding; the
/// method and payload are fixed by the transport.
#[derive(Debug, Clone)]
pub struct Call {
    method: String,
    metadata: Metadata,
    request: Value,
    extensions: Extensions,
}

impl Call {
    pub fn new(method: impl Into<String>, request: Value) -> Self {
        Self {
            method: method.into(),
            metadata: Metadata::new(),
            request,
            extensions: Extensions::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Builder-style metadata append. Invalid entries are dropped with a warning.
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        if let Err(e) = self.metadata.append(key, value) {
            warn!(key, error = %e, "Dropping invalid call metadata");
        }
        self
    }

    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[inline]
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[inline]
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    #[inline]
    #[must_use]
    pub const fn request(&self) -> &Value {
        &self.request
    }

    #[inline]
    #[must_use]
    pub const fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    #[inline]
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Decode the payload into a typed request. A missing payload decodes as `{}`.
    ///
    /// # Errors
    /// Returns `INVALID_ARGUMENT` if the payload does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        let payload = match &self.request {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other.clone(),
        };
        serde_json::from_value(payload)
            .map_err(|e| AppError::invalid_argument(format!("Invalid request: {e}")))
    }
}

/// Per-call context handed to every interceptor.
#[derive(Debug, Clone)]
pub struct CallContext {
    method: String,
    request_id: String,
    received_at: DateTime<Utc>,
}

impl CallContext {
    /// Build the context for `method`, reusing the caller's request id when
    /// it is present and sane.
    #[must_use]
    pub fn new(method: impl Into<String>, metadata: &Metadata) -> Self {
        let request_id = metadata
            .get(keys::REQUEST_ID)
            .filter(|s| !s.is_empty() && s.len() <= MAX_REQUEST_ID_LENGTH)
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);

        Self {
            method: method.into(),
            request_id,
            received_at: Utc::now(),
        }
    }

    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[inline]
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    #[inline]
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}
