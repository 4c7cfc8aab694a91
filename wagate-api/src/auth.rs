//! API key authentication and request ids.
//!
//! The key is accepted from the `apikey` header or `Authorization: Bearer`.
//! With no key configured the API is open.

use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::Instrument;
use wagate_common::logging::generate_trace_id;
use wagate_common::Error;

pub const API_KEY_HEADER: &str = "apikey";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Configured API key, shared with the middleware.
#[derive(Clone, Default)]
pub struct ApiKey(Option<Arc<str>>);

impl ApiKey {
    pub fn new(key: Option<&str>) -> Self {
        Self(key.filter(|k| !k.is_empty()).map(Arc::from))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }

    fn accepts(&self, presented: Option<&str>) -> bool {
        match (&self.0, presented) {
            (None, _) => true,
            (Some(expected), Some(presented)) => constant_time_eq(expected.as_bytes(), presented.as_bytes()),
            (Some(_), None) => false,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|h| h.to_str().ok()) {
        return Some(key.trim());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Reject requests without the configured API key.
pub async fn require_api_key(State(key): State<ApiKey>, request: Request, next: Next) -> Response {
    if key.accepts(presented_key(request.headers())) {
        return next.run(request).await;
    }
    tracing::warn!(path = %request.uri().path(), "Rejected request with missing or invalid API key");
    ApiError(Error::Auth("missing or invalid API key".into())).into_response()
}

/// Tag each request with an id (taken from `x-request-id` when present) and
/// run it inside a span carrying that id.
pub async fn request_id(request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.is_empty() && h.len() <= 128)
        .map_or_else(generate_trace_id, str::to_string);

    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let mut response = next.run(request).instrument(span.clone()).await;
    span.in_scope(|| tracing::debug!(status = response.status().as_u16(), "Request finished"));

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
