//! Multiplexed message routing over a single client WebSocket.
//!
//! # Responsibilities
//! - Greet each session with its ID
//! - Answer control messages (`ping`, `get_stats`) locally
//! - Route every other message to `<instance>/ws/message` of its `service`
//! - Report failures inline; the session always stays open
//!
//! # Design Decisions
//! - Messages are handled strictly in arrival order, one at a time
//! - Service resolution happens per message
//! - The `service` routing key is removed before forwarding

use std::net::SocketAddr;
use std::time::SystemTime;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::http::server::AppState;
use crate::http::websocket::{CloseInfo, CLOSE_GOING_AWAY};
use crate::net::{SessionGuard, SessionKind};
use crate::observability::metrics;
use crate::registry::instance::epoch_secs;

/// Per-session counters returned by `get_stats`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SessionStats {
    pub messages_received: u64,
    pub messages_routed: u64,
    pub errors: u64,
    pub connected_at: u64,
}

/// `GET /ws`
pub async fn multiplex_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| run_session(socket, state, peer))
}

async fn run_session(mut socket: WebSocket, state: AppState, peer: SocketAddr) {
    let session = state.sessions.track(SessionKind::Multiplex, None, peer.ip());
    let mut stats = SessionStats {
        connected_at: epoch_secs(SystemTime::now()),
        ..SessionStats::default()
    };
    let mut shutdown = state.shutdown.subscribe();

    tracing::info!(session_id = %session.id(), client = %peer, "Multiplexed session started");

    let greeting = json!({
        "type": "connection_established",
        "session_id": session.id(),
        "server_time": stats.connected_at,
    });
    if send_json(&mut socket, &greeting).await.is_err() {
        return;
    }

    loop {
        let frame = tokio::select! {
            frame = socket.recv() => frame,
            _ = shutdown.recv() => {
                let close = CloseInfo::new(CLOSE_GOING_AWAY, "Gateway shutting down");
                let _ = socket.send(close.to_client()).await;
                break;
            }
        };

        let reply = match frame {
            Some(Ok(Message::Text(text))) => {
                stats.messages_received += 1;
                session.record_message();
                handle_text(&state, &session, &mut stats, text.as_str()).await
            }
            Some(Ok(Message::Binary(_))) => reject_binary(&mut stats),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(session_id = %session.id(), error = %e, "Session read failed");
                break;
            }
        };

        if send_json(&mut socket, &reply).await.is_err() {
            break;
        }
    }

    tracing::info!(
        session_id = %session.id(),
        received = stats.messages_received,
        routed = stats.messages_routed,
        errors = stats.errors,
        "Multiplexed session ended"
    );
}

async fn send_json(socket: &mut WebSocket, value: &Value) -> Result<(), axum::Error> {
    socket.send(Message::Text(value.to_string().into())).await
}

/// Produce the reply for one text frame.
async fn handle_text(
    state: &AppState,
    session: &SessionGuard,
    stats: &mut SessionStats,
    text: &str,
) -> Value {
    let envelope = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(envelope)) => envelope,
        _ => {
            stats.errors += 1;
            metrics::record_mux_message("error");
            return error_reply("Invalid JSON format");
        }
    };

    match envelope.get("type").and_then(Value::as_str) {
        Some("ping") => {
            metrics::record_mux_message("control");
            return json!({ "type": "pong", "timestamp": epoch_secs(SystemTime::now()) });
        }
        Some("get_stats") => {
            metrics::record_mux_message("control");
            return json!({
                "type": "stats_response",
                "session_id": session.id(),
                "stats": stats,
            });
        }
        _ => {}
    }

    match route_message(state, envelope).await {
        Ok(reply) => {
            stats.messages_routed += 1;
            metrics::record_mux_message("routed");
            reply
        }
        Err(message) => {
            stats.errors += 1;
            metrics::record_mux_message("error");
            error_reply(&message)
        }
    }
}

/// Forward one envelope to its service. The error is the inline message text.
async fn route_message(state: &AppState, mut envelope: Map<String, Value>) -> Result<Value, String> {
    let service = match envelope.remove("service") {
        Some(Value::String(service)) if !service.is_empty() => service,
        _ => return Err("Service name required".to_string()),
    };

    let guard = state
        .balancer
        .resolve(&service)
        .map_err(|_| format!("Service {service} not available"))?;
    let url = format!("{}/ws/message", guard.address());

    let response = state
        .client
        .post(&url)
        .timeout(state.timeouts.message())
        .json(&envelope)
        .send()
        .await
        .map_err(|e| {
            tracing::error!(service = %service, target = %url, error = %e, "Message forwarding failed");
            metrics::record_upstream_error(&service, if e.is_timeout() { "timeout" } else { "unreachable" });
            if e.is_connect() {
                state.balancer.report_health(&service, guard.address(), false);
            }
            "Service communication error".to_string()
        })?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        metrics::record_upstream_error(&service, "upstream");
        return Err(format!("Service error: {}", status.as_u16()));
    }

    response.json::<Value>().await.map_err(|e| {
        tracing::error!(service = %service, error = %e, "Service reply is not JSON");
        "Service communication error".to_string()
    })
}

fn reject_binary(stats: &mut SessionStats) -> Value {
    stats.messages_received += 1;
    stats.errors += 1;
    metrics::record_mux_message("error");
    error_reply("Binary frames are not supported")
}

fn error_reply(message: &str) -> Value {
    json!({ "type": "error", "message": message })
}
