pub mod connection_manager;
pub mod events;
pub mod handler;

pub use connection_manager::ConnectionManager;
pub use handler::websocket_handler;

use uuid::Uuid;

use crate::state::AppState;
use events::ServerMessage;

/// Sends an event to every live session belonging to any of `participant_ids`
/// — the conversation room — and, per the fan-out rule (every
/// conversation-targeted event also reaches the global `conversations`
/// room every socket joins at connect), to every other currently connected
/// session too, so a client with no conversation open still gets the
/// inbox-list update. The global broadcast excludes sessions already
/// reached through the conversation room so a socket in both never
/// receives the same event twice.
pub async fn emit_to_conversation(state: &AppState, participant_ids: &[i64], msg: &ServerMessage) {
    let session_ids = state.presence.sessions_for_users(participant_ids).await;
    send(state, &session_ids, msg).await;

    match serde_json::to_string(msg) {
        Ok(json) => state.connections.broadcast_to_all_except(&session_ids, &json).await,
        Err(e) => tracing::error!(error = ?e, event = msg.event, "failed to serialize outbound event"),
    }
}

/// Same as [`emit_to_conversation`] but skips one originating session —
/// used only for `typing.start`/`typing.stop`, the one case the fan-out
/// rule excludes the sender's own socket rather than the whole room.
pub async fn emit_to_conversation_except_session(
    state: &AppState,
    participant_ids: &[i64],
    excluded: Uuid,
    msg: &ServerMessage,
) {
    let session_ids = state.presence.sessions_for_users(participant_ids).await;
    match serde_json::to_string(msg) {
        Ok(json) => {
            state
                .connections
                .broadcast_to_sessions_except(&session_ids, excluded, &json)
                .await;
        }
        Err(e) => tracing::error!(error = ?e, event = msg.event, "failed to serialize outbound event"),
    }
}

/// Sends an event to every currently connected session — the global room
/// every socket implicitly joins on connect.
pub async fn emit_to_global(state: &AppState, msg: &ServerMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => state.connections.broadcast_to_all(&json).await,
        Err(e) => tracing::error!(error = ?e, event = msg.event, "failed to serialize outbound event"),
    }
}

async fn send(state: &AppState, session_ids: &[Uuid], msg: &ServerMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => state.connections.broadcast_to_sessions(session_ids, &json).await,
        Err(e) => tracing::error!(error = ?e, event = msg.event, "failed to serialize outbound event"),
    }
}
