//! Unary request forwarding.
//!
//! # Responsibilities
//! - Resolve `/api/{segment}/...` to a service instance
//! - Forward method, headers, query and body to the instance
//! - Relay the backend response or a classified error
//! - Feed latency and connect failures back to the balancer

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, Method, Request},
    response::{IntoResponse, Response},
};

use crate::http::request::{forward_headers, request_id, target_url};
use crate::http::response::{relay, ProxyError};
use crate::http::server::AppState;
use crate::observability::metrics;

/// `ANY /api/{service}/{*path}`
pub async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path((segment, path)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    forward(state, peer, &segment, &path, request).await
}

/// `ANY /api/{service}`
pub async fn proxy_root_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(segment): Path<String>,
    request: Request<Body>,
) -> Response {
    forward(state, peer, &segment, "", request).await
}

async fn forward(
    state: AppState,
    peer: SocketAddr,
    segment: &str,
    path: &str,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let service = state.router.resolve(segment).to_string();
    let method = request.method().to_string();

    match try_forward(&state, peer, &service, path, request, start).await {
        Ok(response) => {
            metrics::record_request("unary", &method, response.status().as_u16(), &service, start);
            response
        }
        Err(err) => {
            metrics::record_upstream_error(&service, err.kind());
            metrics::record_request("unary", &method, err.status().as_u16(), &service, start);
            err.into_response()
        }
    }
}

async fn try_forward(
    state: &AppState,
    peer: SocketAddr,
    service: &str,
    path: &str,
    request: Request<Body>,
    start: Instant,
) -> Result<Response, ProxyError> {
    let request_id = request_id(request.headers());
    let guard = state.balancer.resolve(service).inspect_err(|_| {
        tracing::warn!(request_id = %request_id, service = %service, "No available instance");
    })?;
    let address = guard.address().to_string();
    let url = target_url(&address, path, request.uri().query());

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, state.max_body_size)
        .await
        .map_err(|e| ProxyError::InvalidBody(e.to_string()))?;

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        service = %service,
        target = %url,
        "Proxying request"
    );

    let upstream = build_upstream(
        &state.client,
        parts.method,
        &url,
        forward_headers(&parts.headers, peer.ip(), &request_id),
        body,
        state.timeouts.request(),
    )
    .inspect_err(|e| {
        tracing::error!(request_id = %request_id, service = %service, target = %url, error = %e, "Failed to build upstream request");
    })?;

    let response = match state.client.execute(upstream).await {
        Ok(response) => response,
        Err(e) if e.is_timeout() => {
            tracing::error!(request_id = %request_id, service = %service, target = %url, "Upstream timed out");
            return Err(ProxyError::Timeout { service: service.to_string() });
        }
        Err(e) if e.is_connect() => {
            tracing::error!(request_id = %request_id, service = %service, target = %url, error = %e, "Upstream unreachable");
            state.balancer.report_health(service, &address, false);
            return Err(ProxyError::Unreachable { service: service.to_string() });
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, service = %service, target = %url, error = %e, "Upstream error");
            return Err(ProxyError::Upstream {
                service: service.to_string(),
                reason: e.to_string(),
            });
        }
    };

    state
        .balancer
        .report_latency(service, &address, start.elapsed());
    tracing::debug!(
        request_id = %request_id,
        service = %service,
        status = response.status().as_u16(),
        "Upstream responded"
    );
    Ok(relay(response, guard))
}

/// The deadline covers the whole exchange, including the streamed body.
/// A backend that stops sending mid-body fails the relay instead of
/// holding the instance guard open.
fn build_upstream(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    headers: HeaderMap,
    body: Bytes,
    deadline: Duration,
) -> Result<reqwest::Request, ProxyError> {
    client
        .request(method, url)
        .headers(headers)
        .body(body)
        .timeout(deadline)
        .build()
        .map_err(|e| ProxyError::Internal(e.to_string()))
}
