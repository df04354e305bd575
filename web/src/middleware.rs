//! Axum middleware binding a task context to every HTTP request.
//!
//! # Flow
//!
//! 1. **Read** the configured trace header (`TRACE-ID` by default)
//! 2. **Bind** a fresh [`Context`] holding its value, stored in request
//!    extensions for handlers
//! 3. **Instrument** the request in an `http_request` span carrying `trace_id`
//! 4. **Echo** the header on the response when the request carried one
//!
//! # Example
//!
//! ```ignore
//! use axum::{routing::get, Router};
//! use contextual_bus_runtime::AdapterConfig;
//! use contextual_bus_web::middleware::trace_context_layer;
//!
//! let app = Router::new()
//!     .route("/hello", get(hello))
//!     .layer(trace_context_layer(AdapterConfig::default()));
//! ```

use crate::extractors::HttpHeaders;
use axum::{extract::Request, response::Response};
use contextual_bus_core::Context;
use contextual_bus_runtime::{bind_context, AdapterConfig};
use http::{HeaderName, HeaderValue};
use std::sync::Arc;
use std::task::Poll;
use tower::{Layer, Service};
use tracing::Instrument;

/// Create a layer that binds a [`Context`] to every request.
#[must_use]
pub fn trace_context_layer(config: AdapterConfig) -> TraceContextLayer {
    TraceContextLayer {
        config: Arc::new(config),
    }
}

/// Layer for request context binding.
#[derive(Clone, Debug)]
pub struct TraceContextLayer {
    config: Arc<AdapterConfig>,
}

impl<S> Layer<S> for TraceContextLayer {
    type Service = TraceContextMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceContextMiddleware {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// Middleware service for request context binding.
#[derive(Clone, Debug)]
pub struct TraceContextMiddleware<S> {
    inner: S,
    config: Arc<AdapterConfig>,
}

impl<S> Service<Request> for TraceContextMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let context = bind_context(&self.config, &HttpHeaders(req.headers()));
        let trace_id = context.get(&self.config.context_key);

        req.extensions_mut().insert(context);

        let span = tracing::info_span!(
            "http_request",
            trace_id = trace_id.as_deref().unwrap_or("-"),
            method = %req.method(),
            uri = %req.uri(),
        );

        let echo = trace_id.and_then(|value| {
            let name = HeaderName::try_from(self.config.inbound_header.as_str()).ok()?;
            let value = HeaderValue::from_str(&value).ok()?;
            Some((name, value))
        });

        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.instrument(span).await?;

            if let Some((name, value)) = echo {
                response.headers_mut().insert(name, value);
            }

            Ok(response)
        })
    }
}

/// Extension trait for reading the bound context from request extensions.
///
/// # Example
///
/// ```ignore
/// use contextual_bus_web::middleware::RequestContextExt;
///
/// async fn handler(req: Request) -> String {
///     let context = req.request_context().unwrap_or_default();
///     context.get_or_default("trace.id", "-")
/// }
/// ```
pub trait RequestContextExt {
    /// The context bound by [`trace_context_layer`], if the layer is installed.
    fn request_context(&self) -> Option<Context>;
}

impl RequestContextExt for Request {
    fn request_context(&self) -> Option<Context> {
        self.extensions().get::<Context>().cloned()
    }
}
