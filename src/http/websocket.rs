//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Resolve and connect the backend before completing the client upgrade
//! - Bidirectional frame forwarding
//! - Close both legs with a meaningful code when either side ends
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Gateway ←──── WebSocket frames ────→ Backend
//!          client_to_backend task ──→
//!          ←── backend_to_client task
//! ```
//!
//! # Design Decisions
//! - One task per direction; the first to finish cancels its sibling
//! - Frame-level forwarding (no message buffering)
//! - Close frames propagated in both directions
//! - Ping/pong answered locally by each side, never forwarded

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{self, CloseFrame, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, protocol::frame::coding::CloseCode},
    MaybeTlsStream, WebSocketStream,
};

use crate::http::server::AppState;
use crate::net::SessionKind;
use crate::observability::metrics;
use crate::registry::InstanceGuard;

type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type BackendSink = SplitSink<BackendSocket, tungstenite::Message>;
type BackendStream = SplitStream<BackendSocket>;
type ClientSink = SplitSink<WebSocket, ws::Message>;
type ClientStream = SplitStream<WebSocket>;

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Close code and reason independent of the WebSocket library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub(crate) fn to_client(&self) -> ws::Message {
        ws::Message::Close(Some(CloseFrame {
            code: self.code,
            reason: self.reason.clone().into(),
        }))
    }

    fn to_backend(&self) -> tungstenite::Message {
        tungstenite::Message::Close(Some(tungstenite::protocol::CloseFrame {
            code: CloseCode::from(self.code),
            reason: self.reason.clone().into(),
        }))
    }
}

/// Why one forwarding direction stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LegEnd {
    /// The reading side sent a close frame.
    Closed(Option<CloseInfo>),
    /// The reading side failed or disappeared without a close frame.
    ReadFailed,
    /// Writing to the other side failed.
    WriteFailed,
    /// The sibling task finished first.
    Cancelled,
}

/// Which side of a duplex session ended it.
enum Finished {
    Client(Option<(BackendSink, LegEnd)>),
    Backend(Option<(ClientSink, LegEnd)>),
    Shutdown,
}

/// A pump that panicked is treated as a failed read.
fn split_done<S>(done: Option<(S, LegEnd)>) -> (Option<S>, LegEnd) {
    match done {
        Some((sink, end)) => (Some(sink), end),
        None => (None, LegEnd::ReadFailed),
    }
}

/// `GET /ws/{service}`
pub async fn duplex_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(segment): Path<String>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let service = state.router.resolve(&segment).to_string();
    let backend = connect_backend(&state, &service).await;

    upgrade.on_upgrade(move |socket| async move {
        match backend {
            Ok((backend, guard)) => run_duplex(socket, backend, guard, state, service, peer).await,
            Err(close) => {
                tracing::warn!(service = %service, reason = %close.reason, "Closing client, backend not connected");
                let mut socket = socket;
                let _ = socket.send(close.to_client()).await;
            }
        }
    })
}

async fn connect_backend(
    state: &AppState,
    service: &str,
) -> Result<(BackendSocket, InstanceGuard), CloseInfo> {
    let guard = state.balancer.resolve(service).map_err(|_| {
        metrics::record_upstream_error(service, "unavailable");
        CloseInfo::new(CLOSE_INTERNAL_ERROR, format!("Service {service} not available"))
    })?;

    let url = backend_ws_url(guard.address());
    match tokio::time::timeout(state.timeouts.connect(), connect_async(url.as_str())).await {
        Ok(Ok((socket, _))) => {
            tracing::debug!(service = %service, target = %url, "Backend WebSocket connected");
            Ok((socket, guard))
        }
        Ok(Err(e)) => {
            tracing::error!(service = %service, target = %url, error = %e, "Backend WebSocket connect failed");
            metrics::record_upstream_error(service, "unreachable");
            if matches!(e, tungstenite::Error::Io(_)) {
                state.balancer.report_health(service, guard.address(), false);
            }
            Err(CloseInfo::new(CLOSE_INTERNAL_ERROR, format!("Service {service} unreachable")))
        }
        Err(_) => {
            tracing::error!(service = %service, target = %url, "Backend WebSocket connect timed out");
            metrics::record_upstream_error(service, "timeout");
            Err(CloseInfo::new(CLOSE_INTERNAL_ERROR, format!("Service {service} timed out")))
        }
    }
}

/// `http://host:port` → `ws://host:port/ws`, `https` → `wss`.
pub fn backend_ws_url(address: &str) -> String {
    let base = if let Some(rest) = address.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = address.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{address}")
    };
    format!("{base}/ws")
}

async fn run_duplex(
    client: WebSocket,
    backend: BackendSocket,
    guard: InstanceGuard,
    state: AppState,
    service: String,
    peer: SocketAddr,
) {
    let session = state
        .sessions
        .track(SessionKind::Duplex, Some(service.clone()), peer.ip());
    let session_id = session.id();
    tracing::info!(session_id = %session_id, service = %service, target = %guard.address(), "Duplex session started");

    let (client_tx, client_rx) = client.split();
    let (backend_tx, backend_rx) = backend.split();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut shutdown = state.shutdown.subscribe();

    let mut upstream = tokio::spawn(client_to_backend(client_rx, backend_tx, cancel_rx.clone()));
    let mut downstream = tokio::spawn(backend_to_client(backend_rx, client_tx, cancel_rx));

    let finished = tokio::select! {
        res = &mut upstream => Finished::Client(res.ok()),
        res = &mut downstream => Finished::Backend(res.ok()),
        _ = shutdown.recv() => Finished::Shutdown,
    };
    let _ = cancel_tx.send(true);

    let (client_sink, backend_sink, (client_close, backend_close)) = match finished {
        Finished::Client(done) => {
            let client_sink = downstream.await.ok().map(|(sink, _)| sink);
            let (backend_sink, end) = split_done(done);
            (client_sink, backend_sink, closes_after_client_end(end))
        }
        Finished::Backend(done) => {
            let backend_sink = upstream.await.ok().map(|(sink, _)| sink);
            let (client_sink, end) = split_done(done);
            (client_sink, backend_sink, closes_after_backend_end(end))
        }
        Finished::Shutdown => {
            let backend_sink = upstream.await.ok().map(|(sink, _)| sink);
            let client_sink = downstream.await.ok().map(|(sink, _)| sink);
            let going_away = CloseInfo::new(CLOSE_GOING_AWAY, "Gateway shutting down");
            (client_sink, backend_sink, (Some(going_away.clone()), Some(going_away)))
        }
    };

    // Closing also flushes the reply to a close frame the peer already sent.
    if let Some(mut sink) = client_sink {
        if let Some(close) = client_close {
            let _ = sink.send(close.to_client()).await;
        }
        let _ = sink.close().await;
    }
    if let Some(mut sink) = backend_sink {
        if let Some(close) = backend_close {
            let _ = sink.send(close.to_backend()).await;
        }
        let _ = sink.close().await;
    }

    drop(guard);
    tracing::info!(session_id = %session_id, service = %service, "Duplex session ended");
}

/// Close frames for (client, backend) after the client leg stopped first.
fn closes_after_client_end(end: LegEnd) -> (Option<CloseInfo>, Option<CloseInfo>) {
    match end {
        // The client frame is replayed to the backend as is.
        LegEnd::Closed(frame) => (
            None,
            Some(frame.unwrap_or_else(|| CloseInfo::new(CLOSE_NORMAL, ""))),
        ),
        LegEnd::ReadFailed => (None, Some(CloseInfo::new(CLOSE_GOING_AWAY, "Client disconnected"))),
        LegEnd::WriteFailed => (
            Some(CloseInfo::new(CLOSE_INTERNAL_ERROR, "Backend connection failed")),
            None,
        ),
        LegEnd::Cancelled => (None, None),
    }
}

/// Close frames for (client, backend) after the backend leg stopped first.
fn closes_after_backend_end(end: LegEnd) -> (Option<CloseInfo>, Option<CloseInfo>) {
    match end {
        LegEnd::Closed(frame) => (
            Some(frame.unwrap_or_else(|| CloseInfo::new(CLOSE_NORMAL, ""))),
            None,
        ),
        LegEnd::ReadFailed => (
            Some(CloseInfo::new(CLOSE_INTERNAL_ERROR, "Backend connection failed")),
            None,
        ),
        LegEnd::WriteFailed => (None, Some(CloseInfo::new(CLOSE_GOING_AWAY, "Client disconnected"))),
        LegEnd::Cancelled => (None, None),
    }
}

async fn client_to_backend(
    mut rx: ClientStream,
    mut tx: BackendSink,
    mut cancel: watch::Receiver<bool>,
) -> (BackendSink, LegEnd) {
    loop {
        let frame = tokio::select! {
            _ = cancel.changed() => return (tx, LegEnd::Cancelled),
            frame = rx.next() => frame,
        };
        let message = match frame {
            Some(Ok(ws::Message::Close(frame))) => {
                let info = frame.map(|f| CloseInfo::new(f.code, f.reason.as_str()));
                return (tx, LegEnd::Closed(info));
            }
            Some(Ok(ws::Message::Text(text))) => tungstenite::Message::Text(text.as_str().to_string().into()),
            Some(Ok(ws::Message::Binary(data))) => tungstenite::Message::Binary(data),
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Client read failed");
                return (tx, LegEnd::ReadFailed);
            }
            None => return (tx, LegEnd::ReadFailed),
        };
        if let Err(e) = tx.send(message).await {
            tracing::debug!(error = %e, "Backend write failed");
            return (tx, LegEnd::WriteFailed);
        }
    }
}

async fn backend_to_client(
    mut rx: BackendStream,
    mut tx: ClientSink,
    mut cancel: watch::Receiver<bool>,
) -> (ClientSink, LegEnd) {
    loop {
        let frame = tokio::select! {
            _ = cancel.changed() => return (tx, LegEnd::Cancelled),
            frame = rx.next() => frame,
        };
        let message = match frame {
            Some(Ok(tungstenite::Message::Close(frame))) => {
                let info = frame.map(|f| CloseInfo::new(u16::from(f.code), f.reason.as_str()));
                return (tx, LegEnd::Closed(info));
            }
            Some(Ok(tungstenite::Message::Text(text))) => ws::Message::Text(text.as_str().to_string().into()),
            Some(Ok(tungstenite::Message::Binary(data))) => ws::Message::Binary(data),
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Backend read failed");
                return (tx, LegEnd::ReadFailed);
            }
            None => return (tx, LegEnd::ReadFailed),
        };
        if let Err(e) = tx.send(message).await {
            tracing::debug!(error = %e, "Client write failed");
            return (tx, LegEnd::WriteFailed);
        }
    }
}
