//! Session lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique session IDs for tracing and greetings
//! - Track open WebSocket sessions for operator views
//! - Let shutdown wait until every session has closed

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::observability::metrics;
use crate::registry::instance::epoch_secs;

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new unique session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// One client paired with one backend socket.
    Duplex,
    /// One client routing messages to many services.
    Multiplex,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Duplex => "duplex",
            SessionKind::Multiplex => "multiplex",
        }
    }
}

#[derive(Debug)]
struct SessionEntry {
    kind: SessionKind,
    service: Option<String>,
    client: IpAddr,
    opened_at: SystemTime,
    messages: AtomicU64,
}

/// Operator view of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub kind: SessionKind,
    pub service: Option<String>,
    pub client: IpAddr,
    pub opened_at: u64,
    pub messages: u64,
}

/// Tracks open sessions for graceful shutdown.
///
/// Uses a watch channel to signal when the open count changes.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    sessions: Arc<DashMap<SessionId, SessionEntry>>,
    total: Arc<AtomicU64>,
    count_tx: Arc<watch::Sender<usize>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            sessions: Arc::new(DashMap::new()),
            total: Arc::new(AtomicU64::new(0)),
            count_tx: Arc::new(tx),
        }
    }

    /// Record a new session. Returns a guard that unregisters it on drop.
    pub fn track(&self, kind: SessionKind, service: Option<String>, client: IpAddr) -> SessionGuard {
        let id = SessionId::new();
        self.sessions.insert(
            id,
            SessionEntry {
                kind,
                service,
                client,
                opened_at: SystemTime::now(),
                messages: AtomicU64::new(0),
            },
        );
        self.total.fetch_add(1, Ordering::Relaxed);
        self.publish();
        metrics::session_opened(kind.as_str());
        tracing::debug!(session_id = %id, kind = kind.as_str(), client = %client, "Session opened");

        SessionGuard {
            tracker: self.clone(),
            id,
            kind,
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions opened since startup.
    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn list(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|e| SessionSnapshot {
                id: *e.key(),
                kind: e.kind,
                service: e.service.clone(),
                client: e.client,
                opened_at: epoch_secs(e.opened_at),
                messages: e.messages.load(Ordering::Relaxed),
            })
            .collect();
        sessions.sort_by_key(|s| s.opened_at);
        sessions
    }

    /// Wait until every session has closed. Returns false on timeout.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let mut rx = self.count_tx.subscribe();
        let drained = tokio::time::timeout(timeout, rx.wait_for(|count| *count == 0)).await;
        matches!(drained, Ok(Ok(_)))
    }

    fn publish(&self) {
        self.count_tx.send_replace(self.sessions.len());
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a session's lifetime.
#[derive(Debug)]
pub struct SessionGuard {
    tracker: SessionTracker,
    id: SessionId,
    kind: SessionKind,
}

impl SessionGuard {
    /// Get this session's ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Count one handled message.
    pub fn record_message(&self) {
        if let Some(entry) = self.tracker.sessions.get(&self.id) {
            entry.messages.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.tracker.sessions.remove(&self.id);
        self.tracker.publish();
        metrics::session_closed(self.kind.as_str());
        tracing::debug!(session_id = %self.id, "Session closed");
    }
}
