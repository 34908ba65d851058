//! Call metadata: a case-insensitive string multimap.
//!
//! Backed by [`http::HeaderMap`] so it converts to and from gRPC metadata and
//! HTTP headers without copying key normalisation rules around.

use http::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

/// Well-known metadata keys consumed or produced by the pipeline.
pub mod keys {
    /// Gateway shared secret.
    pub const API_KEY: &str = "x-api-key";
    /// Gateway identifier.
    pub const GATEWAY_ID: &str = "x-gateway-id";
    /// Per-user bearer credential.
    pub const SERVICE_TOKEN: &str = "x-service-token";
    /// Secret presented by the internal gateway to internal-only services.
    pub const INTERNAL_GATEWAY_KEY: &str = "x-internal-gateway-key";
    /// Request correlation id.
    pub const REQUEST_ID: &str = "x-request-id";
    /// Identity injected after token verification.
    pub const USER_ID: &str = "x-user-id";
    pub const USER_EMAIL: &str = "x-user-email";
    pub const USER_ROLE: &str = "x-user-role";
    /// Error message mirror on wire errors.
    pub const MESSAGE: &str = "message";
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("invalid metadata key: {0}")]
    InvalidKey(String),
    #[error("invalid value for metadata key {0}")]
    InvalidValue(String),
}

/// Case-insensitive keys, multiple values per key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(HeaderMap);

impl Metadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `key`. Non-UTF-8 values are treated as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        let name = HeaderName::from_bytes(key.as_bytes()).ok()?;
        self.0.get(name).and_then(|v| v.to_str().ok())
    }

    /// All values for `key`, in insertion order.
    #[must_use]
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
            return Vec::new();
        };
        self.0
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        HeaderName::from_bytes(key.as_bytes()).is_ok_and(|name| self.0.contains_key(name))
    }

    /// Replace every value of `key` with `value`.
    ///
    /// # Errors
    /// Returns [`MetadataError`] if the key or value is not representable.
    pub fn insert(&mut self, key: &str, value: &str) -> Result<(), MetadataError> {
        let (name, value) = Self::entry(key, value)?;
        self.0.insert(name, value);
        Ok(())
    }

    /// Add `value` alongside any existing values of `key`.
    ///
    /// # Errors
    /// Returns [`MetadataError`] if the key or value is not representable.
    pub fn append(&mut self, key: &str, value: &str) -> Result<(), MetadataError> {
        let (name, value) = Self::entry(key, value)?;
        self.0.append(name, value);
        Ok(())
    }

    /// Remove `key`, returning its first value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let name = HeaderName::from_bytes(key.as_bytes()).ok()?;
        self.0
            .remove(name)
            .and_then(|v| v.to_str().ok().map(str::to_owned))
    }

    /// Number of stored values (not distinct keys).
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(key, value)` pairs, skipping non-UTF-8 values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str(), v)))
    }

    #[inline]
    #[must_use]
    pub const fn as_header_map(&self) -> &HeaderMap {
        &self.0
    }

    #[must_use]
    pub fn into_header_map(self) -> HeaderMap {
        self.0
    }

    fn entry(key: &str, value: &str) -> Result<(HeaderName, HeaderValue), MetadataError> {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| MetadataError::InvalidKey(key.to_string()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| MetadataError::InvalidValue(key.to_string()))?;
        Ok((name, value))
    }
}

impl From<HeaderMap> for Metadata {
    fn from(headers: HeaderMap) -> Self {
        Self(headers)
    }
}

impl From<&HeaderMap> for Metadata {
    fn from(headers: &HeaderMap) -> Self {
        Self(headers.clone())
    }
}

impl From<&tonic::metadata::MetadataMap> for Metadata {
    fn from(metadata: &tonic::metadata::MetadataMap) -> Self {
        Self(metadata.clone().into_headers())
    }
}

impl From<Metadata> for tonic::metadata::MetadataMap {
    fn from(metadata: Metadata) -> Self {
        Self::from_headers(metadata.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive() {
        let mut md = Metadata::new();
        md.insert("X-Api-Key", "gateway").unwrap();

        assert_eq!(md.get("x-api-key"), Some("gateway"));
        assert_eq!(md.get("X-API-KEY"), Some("gateway"));
        assert!(md.contains_key("x-Api-key"));
    }

    #[test]
    fn append_keeps_multiple_values() {
        let mut md = Metadata::new();
        md.append("x-forwarded-for", "203.0.113.1").unwrap();
        md.append("X-Forwarded-For", "70.41.3.18").unwrap();

        assert_eq!(md.get_all("x-forwarded-for"), vec!["203.0.113.1", "70.41.3.18"]);
        assert_eq!(md.get("x-forwarded-for"), Some("203.0.113.1"));
        assert_eq!(md.len(), 2);
    }

    #[test]
    fn insert_replaces_all_values() {
        let mut md = Metadata::new();
        md.append(keys::USER_ID, "spoofed").unwrap();
        md.append(keys::USER_ID, "spoofed-again").unwrap();
        md.insert(keys::USER_ID, "verified").unwrap();

        assert_eq!(md.get_all(keys::USER_ID), vec!["verified"]);
    }

    #[test]
    fn invalid_entries_are_rejected() {
        let mut md = Metadata::new();
        assert!(matches!(
            md.insert("bad key", "v"),
            Err(MetadataError::InvalidKey(_))
        ));
        assert!(matches!(
            md.insert("x-ok", "line\nbreak"),
            Err(MetadataError::InvalidValue(_))
        ));
        assert!(md.get("bad key").is_none());
    }

    #[test]
    fn remove_returns_first_value() {
        let mut md = Metadata::new();
        md.insert(keys::SERVICE_TOKEN, "abc").unwrap();
        assert_eq!(md.remove(keys::SERVICE_TOKEN).as_deref(), Some("abc"));
        assert!(md.is_empty());
    }

    #[test]
    fn converts_to_and_from_grpc_metadata() {
        let mut md = Metadata::new();
        md.insert(keys::MESSAGE, "hello").unwrap();

        let grpc: tonic::metadata::MetadataMap = md.clone().into();
        assert_eq!(Metadata::from(&grpc), md);
    }
}
