//! Client IP resolution from proxy metadata or the socket peer.
//!
//! Checked in order: `CF-Connecting-IP`, `X-Real-IP`, then the first hop of
//! `X-Forwarded-For`. The resolved address rides along in call extensions.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use http::Request;
use pipeline_core::Metadata;

const IP_HEADERS: &[&str] = &["cf-connecting-ip", "x-real-ip", "x-forwarded-for"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

impl ClientIp {
    /// Resolve from call metadata, falling back to `peer`.
    #[must_use]
    pub fn from_metadata(metadata: &Metadata, peer: Option<IpAddr>) -> Self {
        let forwarded = IP_HEADERS.iter().find_map(|header| {
            metadata
                .get(header)
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .and_then(|ip| ip.parse::<IpAddr>().ok())
        });
        Self(forwarded.or(peer))
    }

    /// Resolve from an HTTP request; the peer comes from axum's `ConnectInfo`.
    #[must_use]
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip());
        Self::from_metadata(&Metadata::from(req.headers()), peer)
    }

    #[inline]
    #[must_use]
    pub const fn ip(&self) -> Option<IpAddr> {
        self.0
    }
}
