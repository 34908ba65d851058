//! Request ID propagation for HTTP-bound calls.
//!
//! The id is stamped onto the request headers before the call is built, so
//! the pipeline's `CallContext` and the response carry the same value.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::{HeaderName, HeaderValue, Request, Response};
use pipeline_core::keys;
use tower::{Layer, Service};
use tracing::Span;
use uuid::Uuid;

const MAX_REQUEST_ID_LENGTH: usize = 64;

static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static(keys::REQUEST_ID);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(Arc<str>);

impl RequestId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    /// Accept a caller-supplied id if it is non-empty and at most 64 bytes.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        (!value.is_empty() && value.len() <= MAX_REQUEST_ID_LENGTH).then(|| Self(value.into()))
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn of<B>(req: &Request<B>) -> Self {
        req.headers()
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
            .unwrap_or_else(Self::generate)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestIdService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let request_id = RequestId::of(&req);
        Span::current().record("request_id", request_id.as_str());

        let header = HeaderValue::from_str(request_id.as_str()).ok();
        if let Some(value) = &header {
            req.headers_mut().insert(REQUEST_ID_HEADER.clone(), value.clone());
        }
        req.extensions_mut().insert(request_id);

        // Take the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            if let Some(value) = header {
                response.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use tower::{ServiceExt, service_fn};

    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(RequestId::generate(), RequestId::generate());
    }

    #[test]
    fn parse_rejects_empty_and_oversized() {
        assert!(RequestId::parse("").is_none());
        assert!(RequestId::parse(&"a".repeat(65)).is_none());
        assert_eq!(RequestId::parse("req-1").map(|id| id.to_string()), Some("req-1".to_string()));
    }

    #[tokio::test]
    async fn caller_id_is_propagated_to_request_and_response() {
        let service = RequestIdLayer.layer(service_fn(|req: Request<()>| async move {
            let seen = req.headers().get(keys::REQUEST_ID).cloned();
            let ext = req.extensions().get::<RequestId>().map(ToString::to_string);
            assert_eq!(ext.as_deref(), Some("req-42"));
            let mut response = Response::new(());
            if let Some(seen) = seen {
                response.headers_mut().insert("x-seen", seen);
            }
            Ok::<_, Infallible>(response)
        }));

        let req = Request::builder().header(keys::REQUEST_ID, "req-42").body(()).unwrap();
        let response = service.oneshot(req).await.unwrap();
        assert_eq!(response.headers()["x-seen"], "req-42");
        assert_eq!(response.headers()[keys::REQUEST_ID], "req-42");
    }

    #[tokio::test]
    async fn missing_id_is_generated() {
        let service = RequestIdLayer.layer(service_fn(|req: Request<()>| async move {
            assert!(req.headers().contains_key(keys::REQUEST_ID));
            Ok::<_, Infallible>(Response::new(()))
        }));

        let response = service.oneshot(Request::new(())).await.unwrap();
        let id = response.headers()[keys::REQUEST_ID].to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }
}
