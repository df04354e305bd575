//! HTTP response sink for the request adapter.

use crate::error::AppError;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use contextual_bus_runtime::{AdapterError, OutboundSink, SinkError};

/// [`OutboundSink`] that builds exactly one axum [`Response`].
///
/// A body becomes `200 OK` with `text/plain`; a failure becomes the
/// [`AppError`] response for it. Any write after the first is rejected.
#[derive(Debug, Default)]
pub struct ResponseSink {
    response: Option<Response>,
}

impl ResponseSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a response has been written.
    #[must_use]
    pub const fn is_written(&self) -> bool {
        self.response.is_some()
    }

    fn store(&mut self, response: Response) -> Result<(), SinkError> {
        if self.response.is_some() {
            return Err(SinkError::new("response already written"));
        }
        self.response = Some(response);
        Ok(())
    }
}

impl OutboundSink for ResponseSink {
    fn write_body(&mut self, body: Bytes) -> Result<(), SinkError> {
        let response = (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response();
        self.store(response)
    }

    fn write_failure(&mut self, failure: &AdapterError) -> Result<(), SinkError> {
        self.store(AppError::from(failure.clone()).into_response())
    }
}

impl IntoResponse for ResponseSink {
    fn into_response(self) -> Response {
        self.response.unwrap_or_else(|| {
            AppError::internal("No response was produced").into_response()
        })
    }
}
