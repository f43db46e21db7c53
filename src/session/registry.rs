use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Per-direction write timeout (spec.md §5 Cancellation & timeouts).
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// One authenticated connection. Grounded in `websocket/handler.rs`'s
/// split-socket pattern — the write half is wrapped in its own lock so
/// frames from different producers (the session's own read loop, the
/// broadcaster, the offer broker) never interleave on the wire.
pub struct Session {
    pub id: Uuid,
    pub team: String,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    failures: std::sync::atomic::AtomicU32,
}

const MAX_SEND_FAILURES: u32 = 3;

impl Session {
    pub fn new(team: String, sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            team,
            sink: Mutex::new(sink),
            failures: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Best-effort send: failures are logged and counted, never
    /// propagated to the caller (spec.md §4.8).
    pub async fn send(&self, payload: &str) {
        let mut sink = self.sink.lock().await;
        let result = tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Text(payload.to_string()))).await;
        match result {
            Ok(Ok(())) => self.failures.store(0, std::sync::atomic::Ordering::SeqCst),
            Ok(Err(err)) => {
                let count = self.failures.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                warn!(session = %self.id, team = %self.team, error = %err, count, "send failed");
            }
            Err(_) => {
                let count = self.failures.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                warn!(session = %self.id, team = %self.team, count, "send timed out");
            }
        }
    }

    pub fn should_remove(&self) -> bool {
        self.failures.load(std::sync::atomic::Ordering::SeqCst) >= MAX_SEND_FAILURES
    }
}

/// Per-team session handles, keyed by team id with multiple sessions
/// permitted per team (spec.md §4.8).
#[derive(Default, Clone)]
pub struct SessionRegistry {
    by_team: Arc<DashMap<String, Vec<Arc<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Arc<Session>) {
        self.by_team.entry(session.team.clone()).or_default().push(session);
    }

    pub fn deregister(&self, team: &str, session_id: Uuid) {
        if let Some(mut sessions) = self.by_team.get_mut(team) {
            sessions.retain(|s| s.id != session_id);
        }
    }

    pub fn sessions_for(&self, team: &str) -> Vec<Arc<Session>> {
        self.by_team.get(team).map(|v| v.clone()).unwrap_or_default()
    }

    pub fn all_sessions(&self) -> Vec<Arc<Session>> {
        self.by_team.iter().flat_map(|e| e.value().clone()).collect()
    }

    pub fn all_teams(&self) -> Vec<String> {
        self.by_team.iter().map(|e| e.key().clone()).collect()
    }

    /// Sweeps sessions that exceeded the send-failure threshold.
    pub fn sweep_dead_sessions(&self) {
        for mut entry in self.by_team.iter_mut() {
            entry.value_mut().retain(|s| !s.should_remove());
        }
    }
}
