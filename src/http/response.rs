//! Response handling and transformation.
//!
//! # Responsibilities
//! - Relay backend responses to the client
//! - Map proxy failures to HTTP status codes and a JSON error body
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Hop-by-hop headers stripped automatically
//! - Backend timeouts result in 504 Gateway Timeout

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{Stream, StreamExt};
use serde_json::json;
use thiserror::Error;

use crate::http::request::is_hop_by_hop;
use crate::load_balancer::BalancerError;
use crate::registry::InstanceGuard;

/// Failure of a proxied call.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("service '{service}' timed out")]
    Timeout { service: String },

    #[error("service '{service}' is unreachable")]
    Unreachable { service: String },

    #[error("service '{service}' failed: {reason}")]
    Upstream { service: String, reason: String },

    #[error("service '{0}' is not available")]
    ServiceUnavailable(String),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<BalancerError> for ProxyError {
    fn from(err: BalancerError) -> Self {
        match err {
            BalancerError::Unavailable(service) => ProxyError::ServiceUnavailable(service),
        }
    }
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Unreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::Timeout { .. } => "UPSTREAM_TIMEOUT",
            ProxyError::Unreachable { .. } => "UPSTREAM_UNREACHABLE",
            ProxyError::Upstream { .. } => "UPSTREAM_ERROR",
            ProxyError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ProxyError::InvalidBody(_) => "INVALID_REQUEST",
            ProxyError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Label for the upstream error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Timeout { .. } => "timeout",
            ProxyError::Unreachable { .. } => "unreachable",
            ProxyError::Upstream { .. } => "upstream",
            ProxyError::ServiceUnavailable(_) => "unavailable",
            ProxyError::InvalidBody(_) => "invalid_body",
            ProxyError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        error_response(self.status(), self.code(), &self.to_string())
    }
}

/// `{"error": {"code": ..., "message": ...}}` with the given status.
pub fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = json!({
        "error": {
            "code": code,
            "message": message,
        }
    });
    (status, Json(body)).into_response()
}

/// Build the client response from a backend response, streaming the body.
///
/// The instance guard travels with the body so the connection slot is held
/// until the last chunk is relayed.
pub fn relay(upstream: reqwest::Response, guard: InstanceGuard) -> Response {
    let status = upstream.status();
    let headers = relay_headers(upstream.headers());
    let body = Body::from_stream(hold_until_done(upstream.bytes_stream(), guard));

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn relay_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

fn hold_until_done<S>(stream: S, guard: InstanceGuard) -> impl Stream<Item = S::Item>
where
    S: Stream,
{
    stream.map(move |chunk| {
        let _slot = &guard;
        chunk
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping() {
        let cases = [
            (ProxyError::Timeout { service: "s".into() }, 504, "UPSTREAM_TIMEOUT"),
            (ProxyError::Unreachable { service: "s".into() }, 503, "UPSTREAM_UNREACHABLE"),
            (
                ProxyError::Upstream { service: "s".into(), reason: "reset".into() },
                502,
                "UPSTREAM_ERROR",
            ),
            (ProxyError::ServiceUnavailable("s".into()), 503, "SERVICE_UNAVAILABLE"),
            (ProxyError::Internal("boom".into()), 500, "INTERNAL_ERROR"),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status().as_u16(), status);
            assert_eq!(err.code(), code);
        }
    }

    #[tokio::test]
    async fn error_body_is_json() {
        let response = ProxyError::ServiceUnavailable("voice-service".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["code"], "SERVICE_UNAVAILABLE");
        assert_eq!(
            value["error"]["message"],
            "service 'voice-service' is not available"
        );
    }

    #[test]
    fn balancer_error_converts() {
        let err: ProxyError = BalancerError::Unavailable("task-service".into()).into();
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
    }
}
