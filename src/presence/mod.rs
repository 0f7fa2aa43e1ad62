//! Presence & Session Registry (C4): pure in-process bookkeeping, never
//! authoritative. Every map here is reconstructable from zero — a restart
//! just means every session reconnects and re-attaches from scratch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

const DEFAULT_TYPING_WINDOW: Duration = Duration::from_millis(1000);

#[derive(Default)]
struct Inner {
    user_sessions: HashMap<i64, HashSet<Uuid>>,
    session_user: HashMap<Uuid, i64>,
    socket_conversations: HashMap<Uuid, HashSet<i64>>,
    active_conversation_viewers: HashMap<i64, HashSet<i64>>,
    typing_throttle: HashMap<(i64, i64), Instant>,
}

/// Cheaply cloneable — all clones share the same underlying state via `Arc`.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session for `user_id`. Returns `true` if this is the
    /// user's first live session (i.e. they were offline a moment ago).
    pub async fn attach(&self, user_id: i64, session_id: Uuid) -> bool {
        let mut inner = self.inner.write().await;
        let was_offline = !inner
            .user_sessions
            .get(&user_id)
            .is_some_and(|s| !s.is_empty());

        inner.user_sessions.entry(user_id).or_default().insert(session_id);
        inner.session_user.insert(session_id, user_id);
        was_offline
    }

    /// Deregisters a session. Returns `true` if the user now has zero live
    /// sessions (i.e. they just went offline).
    pub async fn detach(&self, user_id: i64, session_id: Uuid) -> bool {
        let mut inner = self.inner.write().await;
        inner.session_user.remove(&session_id);

        if let Some(sessions) = inner.user_sessions.get_mut(&user_id) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                inner.user_sessions.remove(&user_id);
                return true;
            }
        }

        false
    }

    /// Returns every conversation `session_id` had joined, for disconnect
    /// cleanup, without mutating any state.
    pub async fn joined_conversations(&self, session_id: Uuid) -> Vec<i64> {
        let inner = self.inner.read().await;
        inner
            .socket_conversations
            .get(&session_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Joins `session_id` to `conversation_id`'s room. Returns `true` if the
    /// session's user was not already a viewer (first of their sessions to
    /// join) — the hub emits `presence:joined` only in that case.
    pub async fn join(&self, session_id: Uuid, conversation_id: i64) -> bool {
        let mut inner = self.inner.write().await;
        let Some(&user_id) = inner.session_user.get(&session_id) else {
            return false;
        };

        inner
            .socket_conversations
            .entry(session_id)
            .or_default()
            .insert(conversation_id);

        let viewers = inner.active_conversation_viewers.entry(conversation_id).or_default();
        let was_viewer = viewers.contains(&user_id);
        viewers.insert(user_id);
        !was_viewer
    }

    /// Leaves `session_id` from `conversation_id`'s room. Returns `true` iff
    /// this was the user's last session with the conversation joined (the
    /// hub emits `presence:left` only in that case).
    pub async fn leave(&self, session_id: Uuid, conversation_id: i64) -> bool {
        let mut inner = self.inner.write().await;
        let Some(&user_id) = inner.session_user.get(&session_id) else {
            return false;
        };

        if let Some(joined) = inner.socket_conversations.get_mut(&session_id) {
            joined.remove(&conversation_id);
        }

        let still_joined = inner.user_sessions.get(&user_id).is_some_and(|sessions| {
            sessions.iter().any(|s| {
                inner
                    .socket_conversations
                    .get(s)
                    .is_some_and(|set| set.contains(&conversation_id))
            })
        });

        if still_joined {
            return false;
        }

        if let Some(viewers) = inner.active_conversation_viewers.get_mut(&conversation_id) {
            viewers.remove(&user_id);
        }

        true
    }

    pub async fn viewers(&self, conversation_id: i64) -> HashSet<i64> {
        self.inner
            .read()
            .await
            .active_conversation_viewers
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.inner
            .read()
            .await
            .user_sessions
            .get(&user_id)
            .is_some_and(|s| !s.is_empty())
    }

    /// Resolves every live session belonging to any of `user_ids` — the
    /// primitive the hub uses to turn "these participants" into "these
    /// sockets" for conversation-room fan-out.
    pub async fn sessions_for_users(&self, user_ids: &[i64]) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        user_ids
            .iter()
            .filter_map(|id| inner.user_sessions.get(id))
            .flat_map(|set| set.iter().copied())
            .collect()
    }

    /// Returns whether this `typing.start` emission should pass through, per
    /// the default one-per-second-per-(conversation,user) throttle.
    pub async fn throttle_typing(&self, conversation_id: i64, user_id: i64) -> bool {
        self.throttle_typing_with_window(conversation_id, user_id, DEFAULT_TYPING_WINDOW)
            .await
    }

    pub async fn throttle_typing_with_window(
        &self,
        conversation_id: i64,
        user_id: i64,
        window: Duration,
    ) -> bool {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let key = (conversation_id, user_id);

        match inner.typing_throttle.get(&key) {
            Some(&last) if now.duration_since(last) < window => false,
            _ => {
                inner.typing_throttle.insert(key, now);
                true
            }
        }
    }

    /// Discards typing-throttle state for a session's user on disconnect.
    /// Best-effort bookkeeping only; a stale entry just means the next
    /// `typing.start` after reconnect is throttled for up to `window` extra.
    pub async fn clear_typing_throttle(&self, user_id: i64) {
        let mut inner = self.inner.write().await;
        inner.typing_throttle.retain(|&(_, u), _| u != user_id);
    }
}
