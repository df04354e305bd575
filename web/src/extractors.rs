//! Custom Axum extractors.
//!
//! - `RequestContext`: the [`Context`] bound by the trace context middleware
//! - `HttpHeaders`: view of an HTTP header map as an adapter trigger
//!
//! # Examples
//!
//! ```ignore
//! use contextual_bus_web::extractors::RequestContext;
//!
//! async fn handler(RequestContext(context): RequestContext) -> String {
//!     context.get_or_default("trace.id", "-")
//! }
//! ```

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use contextual_bus_core::Context;
use contextual_bus_runtime::InboundTrigger;

/// Task context of the current HTTP request.
///
/// Yields the context bound by
/// [`trace_context_layer`](crate::middleware::trace_context_layer), or an
/// empty context when the layer is not installed.
#[derive(Debug, Clone, Default)]
pub struct RequestContext(pub Context);

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let context = parts.extensions.get::<Context>().cloned().unwrap_or_default();
        Ok(Self(context))
    }
}

/// HTTP headers as an [`InboundTrigger`].
///
/// Header lookup is case-insensitive; values that are not visible ASCII are
/// treated as absent.
#[derive(Debug, Clone, Copy)]
pub struct HttpHeaders<'a>(pub &'a HeaderMap);

impl InboundTrigger for HttpHeaders<'_> {
    fn header(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|value| value.to_str().ok())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};
    use contextual_bus_core::keys;

    #[tokio::test]
    async fn test_request_context_from_extensions() {
        let mut req = Request::builder().body(()).expect("Valid request");
        req.extensions_mut()
            .insert(Context::from_entries([(keys::TRACE_ID, "abc")]));

        let (mut parts, _) = req.into_parts();
        let RequestContext(context) = RequestContext::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(context.get(keys::TRACE_ID).as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_request_context_defaults_to_empty() {
        let req = Request::builder().body(()).expect("Valid request");

        let (mut parts, _) = req.into_parts();
        let RequestContext(context) = RequestContext::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert!(context.is_empty());
    }

    #[test]
    fn test_http_headers_trigger() {
        let mut headers = HeaderMap::new();
        headers.insert("trace-id", HeaderValue::from_static("abc"));
        headers.insert("x-binary", HeaderValue::from_bytes(&[0xfa]).unwrap());

        let trigger = HttpHeaders(&headers);
        assert_eq!(trigger.header("TRACE-ID"), Some("abc"));
        assert_eq!(trigger.header("x-binary"), None);
        assert_eq!(trigger.header("missing"), None);
    }
}
