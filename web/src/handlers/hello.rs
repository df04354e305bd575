//! Hello endpoint: forwards each request to the `foo` consumer.

use crate::{extractors::RequestContext, sink::ResponseSink, state::AppState};
use axum::extract::State;
use bytes::Bytes;

/// Bus address the hello endpoint requests.
pub const HELLO_ADDRESS: &str = "foo";

/// Body sent with every hello request.
pub const HELLO_BODY: &str = "bar";

/// Greet the caller with the reply of the `foo` consumer.
///
/// The request context bound by the trace context middleware travels with
/// the bus request, so the consumer sees the caller's `TRACE-ID`.
///
/// # Endpoint
///
/// ```text
/// GET /hello
/// ```
///
/// # Response
///
/// ```text
/// Hello world!
/// ```
///
/// Bus failures produce the JSON error body of [`AppError`](crate::AppError).
pub async fn hello(
    State(state): State<AppState>,
    RequestContext(context): RequestContext,
) -> ResponseSink {
    let adapter = state.adapter();
    let outcome = adapter
        .dispatch(&context, HELLO_ADDRESS, HELLO_BODY)
        .await
        .map(|reply| {
            let name = String::from_utf8_lossy(reply.body());
            Bytes::from(format!("Hello {name}!"))
        });

    let mut sink = ResponseSink::new();
    if let Err(err) = adapter.complete(&mut sink, outcome) {
        metrics::counter!("http_hello_failures_total", "kind" => format!("{:?}", err.kind()))
            .increment(1);
        tracing::debug!(error = %err, "Hello request failed");
    }
    sink
}
