//! Unary proxy behavior against live backends.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::Request,
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Value};
use service_gateway::config::RouteConfig;

mod common;

#[tokio::test]
async fn forwards_method_path_query_and_body() {
    let backend_addr: SocketAddr = "127.0.0.1:28301".parse().unwrap();
    let gateway_addr: SocketAddr = "127.0.0.1:28302".parse().unwrap();

    let echo = Router::new().route(
        "/{*path}",
        any(|request: Request| async move {
            let method = request.method().to_string();
            let uri = request.uri().to_string();
            let forwarded = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let body = axum::body::to_bytes(request.into_body(), 1024).await.unwrap();
            Json(json!({
                "method": method,
                "uri": uri,
                "forwarded_for": forwarded,
                "body": String::from_utf8_lossy(&body),
            }))
        }),
    );
    common::start_router_backend(backend_addr, echo).await;

    let mut config = common::gateway_config(gateway_addr);
    config.services.push(common::service("echo-service", backend_addr));
    config.routes.push(RouteConfig {
        prefix: "echo".into(),
        service: "echo-service".into(),
    });
    let _shutdown = common::start_gateway(config).await;

    let res = common::client()
        .post(format!("http://{}/api/echo/items/42?verbose=1", gateway_addr))
        .body("payload")
        .send()
        .await
        .expect("Gateway unreachable");

    assert_eq!(res.status(), 200);
    assert!(res.headers().contains_key("x-request-id"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["method"], "POST");
    assert_eq!(body["uri"], "/items/42?verbose=1");
    assert_eq!(body["forwarded_for"], "127.0.0.1");
    assert_eq!(body["body"], "payload");
}

#[tokio::test]
async fn unknown_service_is_unavailable() {
    let gateway_addr: SocketAddr = "127.0.0.1:28304".parse().unwrap();
    let _shutdown = common::start_gateway(common::gateway_config(gateway_addr)).await;

    let res = common::client()
        .get(format!("http://{}/api/missing/anything", gateway_addr))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn slow_backend_times_out() {
    let backend_addr: SocketAddr = "127.0.0.1:28305".parse().unwrap();
    let gateway_addr: SocketAddr = "127.0.0.1:28306".parse().unwrap();

    let slow = Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        }),
    );
    common::start_router_backend(backend_addr, slow).await;

    let mut config = common::gateway_config(gateway_addr);
    config.timeouts.request_secs = 1;
    config.services.push(common::service("slow-service", backend_addr));
    let _shutdown = common::start_gateway(config).await;

    let res = common::client()
        .get(format!("http://{}/api/slow-service/slow", gateway_addr))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 504);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UPSTREAM_TIMEOUT");
}

#[tokio::test]
async fn refused_connection_marks_instance_unhealthy() {
    let backend_addr: SocketAddr = "127.0.0.1:28307".parse().unwrap();
    let gateway_addr: SocketAddr = "127.0.0.1:28308".parse().unwrap();

    let backend = common::start_mock_backend(backend_addr, "ok").await;

    let mut config = common::gateway_config(gateway_addr);
    config.registry.probe_interval_secs = 60;
    config.services.push(common::service("flaky", backend_addr));
    let _shutdown = common::start_gateway(config).await;

    let client = common::client();
    let res = client
        .get(format!("http://{}/api/flaky", gateway_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "ok");

    backend.abort();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let res = client
        .get(format!("http://{}/api/flaky", gateway_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UPSTREAM_UNREACHABLE");

    // The failed connect took the only instance out of rotation.
    let res = client
        .get(format!("http://{}/api/flaky", gateway_addr))
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn round_robin_spreads_requests() {
    let first: SocketAddr = "127.0.0.1:28309".parse().unwrap();
    let second: SocketAddr = "127.0.0.1:28310".parse().unwrap();
    let gateway_addr: SocketAddr = "127.0.0.1:28311".parse().unwrap();

    common::start_mock_backend(first, "one").await;
    common::start_mock_backend(second, "two").await;

    let mut config = common::gateway_config(gateway_addr);
    config.services.push(common::service("pair", first));
    config.services.push(common::service("pair", second));
    let _shutdown = common::start_gateway(config).await;

    let client = common::client();
    let mut bodies = Vec::new();
    for _ in 0..4 {
        let res = client
            .get(format!("http://{}/api/pair", gateway_addr))
            .send()
            .await
            .unwrap();
        bodies.push(res.text().await.unwrap());
    }

    assert_eq!(bodies.iter().filter(|b| *b == "one").count(), 2);
    assert_eq!(bodies.iter().filter(|b| *b == "two").count(), 2);
    assert_ne!(bodies[0], bodies[1]);
}

#[tokio::test]
async fn stalled_body_is_cut_off_and_releases_instance() {
    let backend_addr: SocketAddr = "127.0.0.1:28312".parse().unwrap();
    let gateway_addr: SocketAddr = "127.0.0.1:28313".parse().unwrap();

    common::start_stalling_backend(backend_addr).await;

    let mut config = common::gateway_config(gateway_addr);
    config.timeouts.request_secs = 1;
    config.admin.enabled = true;
    config.admin.api_key = "test-key".into();
    config.services.push(common::service("stall-service", backend_addr));
    let _shutdown = common::start_gateway(config).await;

    let client = common::client();
    let res = client
        .get(format!("http://{}/api/stall-service/download", gateway_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    // The request deadline ends the relayed body instead of hanging on it.
    let body = tokio::time::timeout(Duration::from_secs(5), res.bytes())
        .await
        .expect("relayed body never finished");
    assert!(body.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats: Value = client
        .get(format!("http://{}/admin/balancer", gateway_addr))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["active_connections"], 0);
}
