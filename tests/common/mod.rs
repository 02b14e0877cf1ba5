//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use service_gateway::config::{GatewayConfig, ServiceConfig};
use service_gateway::http::HttpServer;
use service_gateway::lifecycle::Shutdown;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Start a simple mock backend that returns a fixed response on every path.
pub async fn start_mock_backend(addr: SocketAddr, response: &'static str) -> JoinHandle<()> {
    start_programmable_backend(addr, move || async move { (200, response.to_string()) }).await
}

/// Start a programmable mock backend with async support.
///
/// Aborting the returned handle drops the listener; later connects are refused.
pub async fn start_programmable_backend<F, Fut>(addr: SocketAddr, f: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    })
}

/// Raw backend that promises a 100-byte body, sends five bytes and then
/// goes quiet. `GET /health` gets a complete `OK`.
pub async fn start_stalling_backend(addr: SocketAddr) -> JoinHandle<()> {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                if buf[..n].starts_with(b"GET /health") {
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK")
                        .await;
                    let _ = socket.shutdown().await;
                    return;
                }
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nhello")
                    .await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    })
}

/// Serve an Axum router as a backend. It always answers `GET /health`.
pub async fn start_router_backend(addr: SocketAddr, router: Router) -> JoinHandle<()> {
    let listener = TcpListener::bind(addr).await.unwrap();
    let app = router.route("/health", get(|| async { Json(json!({ "status": "healthy" })) }));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    })
}

async fn echo_frames(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(_) | Message::Binary(_) => {
                if socket.send(message).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Backend echoing every WebSocket frame on `/ws`.
pub async fn start_ws_echo_backend(addr: SocketAddr) -> JoinHandle<()> {
    async fn echo(upgrade: WebSocketUpgrade) -> Response {
        upgrade.on_upgrade(echo_frames)
    }
    start_router_backend(addr, Router::new().route("/ws", get(echo))).await
}

/// Echo backend whose flag flips once its side of the session has ended.
pub async fn start_tracked_ws_echo_backend(addr: SocketAddr) -> Arc<AtomicBool> {
    let ended = Arc::new(AtomicBool::new(false));
    let flag = ended.clone();
    let router = Router::new().route(
        "/ws",
        get(move |upgrade: WebSocketUpgrade| {
            let flag = flag.clone();
            async move {
                upgrade.on_upgrade(move |socket| async move {
                    echo_frames(socket).await;
                    flag.store(true, Ordering::SeqCst);
                })
            }
        }),
    );
    start_router_backend(addr, router).await;
    ended
}

/// Backend answering multiplexed messages on `POST /ws/message`.
///
/// Replies `{"type": "response", "received": <body>, "backend": <tag>}`.
pub async fn start_message_backend(addr: SocketAddr, tag: &'static str) -> JoinHandle<()> {
    let router = Router::new().route(
        "/ws/message",
        post(move |Json(body): Json<Value>| async move {
            Json(json!({ "type": "response", "received": body, "backend": tag }))
        }),
    );
    start_router_backend(addr, router).await
}

pub fn service(name: &str, addr: SocketAddr) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        address: addr.to_string(),
        weight: 1,
        metadata: Default::default(),
    }
}

/// Config bound to `addr` with the rate limiter off and a short probe period.
pub fn gateway_config(addr: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = addr.to_string();
    config.rate_limit.enabled = false;
    config.registry.probe_interval_secs = 1;
    config.registry.probe_timeout_secs = 1;
    config.timeouts.connect_secs = 1;
    config.timeouts.drain_secs = 1;
    config.observability.metrics_enabled = false;
    config
}

/// Run a gateway in the background. Triggering the returned handle stops it.
pub async fn start_gateway(config: GatewayConfig) -> Shutdown {
    let shutdown = Shutdown::new();
    let (_, config_updates) = mpsc::unbounded_channel();
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let server = HttpServer::new(config);
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
