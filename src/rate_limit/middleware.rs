//! Rate limiting middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::response::error_response;
use crate::observability::metrics;
use crate::rate_limit::{RateDecision, RateLimiter};

/// Reject requests from clients over their budget with 429.
///
/// The client key is the peer IP address.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = addr.ip().to_string();

    let retry_after = match limiter.check(&client) {
        RateDecision::Allowed => return next.run(request).await,
        RateDecision::Blocked { retry_after } => {
            metrics::record_rate_limited("blocked");
            Some(retry_after)
        }
        RateDecision::Throttled => {
            metrics::record_rate_limited("burst");
            None
        }
    };

    tracing::warn!(client = %client, path = %request.uri().path(), "Rate limit exceeded");
    let mut response = error_response(
        StatusCode::TOO_MANY_REQUESTS,
        "RATE_LIMITED",
        "Rate limit exceeded",
    );
    if let Some(retry_after) = retry_after {
        let secs = retry_after.as_secs().max(1);
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}
