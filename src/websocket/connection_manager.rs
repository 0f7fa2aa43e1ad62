use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Tracks live WebSocket connections keyed by session ID — one entry per
/// socket, not per user, so a user with several open sessions (phone, web,
/// desktop) gets one sender per session here.
///
/// Cheaply cloneable — all clones share the same underlying map via `Arc`.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: Arc<RwLock<HashMap<Uuid, mpsc::UnboundedSender<String>>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the sender half for a newly accepted session.
    pub async fn add(&self, session_id: Uuid, tx: mpsc::UnboundedSender<String>) {
        self.connections.write().await.insert(session_id, tx);
    }

    /// Removes a session's sender (called on disconnect).
    pub async fn remove(&self, session_id: Uuid) {
        self.connections.write().await.remove(&session_id);
    }

    /// Sends a JSON-serialized message to a single session.
    ///
    /// Silently ignores sends to sessions that are not connected or whose
    /// channel has already been closed — a failed send is always non-fatal.
    pub async fn send_to_session(&self, session_id: Uuid, message: &str) {
        let conns = self.connections.read().await;
        if let Some(tx) = conns.get(&session_id) {
            let _ = tx.send(message.to_owned());
        }
    }

    /// Sends a JSON-serialized message to every session in the provided list.
    ///
    /// Stale or disconnected entries are silently skipped.
    pub async fn broadcast_to_sessions(&self, session_ids: &[Uuid], message: &str) {
        let conns = self.connections.read().await;
        for session_id in session_ids {
            if let Some(tx) = conns.get(session_id) {
                let _ = tx.send(message.to_owned());
            }
        }
    }

    /// Sends to every session in `session_ids` except `excluded` — used for
    /// the typing-event fan-out rule, which excludes only the originating
    /// session, not the whole sending user.
    pub async fn broadcast_to_sessions_except(
        &self,
        session_ids: &[Uuid],
        excluded: Uuid,
        message: &str,
    ) {
        let conns = self.connections.read().await;
        for session_id in session_ids {
            if *session_id == excluded {
                continue;
            }
            if let Some(tx) = conns.get(session_id) {
                let _ = tx.send(message.to_owned());
            }
        }
    }

    /// Sends to every currently connected session — the global room.
    pub async fn broadcast_to_all(&self, message: &str) {
        let conns = self.connections.read().await;
        for tx in conns.values() {
            let _ = tx.send(message.to_owned());
        }
    }

    /// Sends to every currently connected session not already in
    /// `excluded` — used to reach the global room's remaining members after
    /// an event has already gone out to a conversation room, so a socket
    /// that belongs to both rooms is never handed the same event twice.
    pub async fn broadcast_to_all_except(&self, excluded: &[Uuid], message: &str) {
        let excluded: HashSet<Uuid> = excluded.iter().copied().collect();
        let conns = self.connections.read().await;
        for (session_id, tx) in conns.iter() {
            if excluded.contains(session_id) {
                continue;
            }
            let _ = tx.send(message.to_owned());
        }
    }

    /// Returns `true` if the session currently has an active WebSocket.
    #[allow(dead_code)]
    pub async fn is_connected(&self, session_id: Uuid) -> bool {
        self.connections.read().await.contains_key(&session_id)
    }

    /// Returns the number of currently connected sessions.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
