use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth;
use crate::error::AppError;
use crate::events::{self, StatusUpdate};
use crate::models::ReadStatus;
use crate::state::AppState;

use super::events::{
    ClientMessage, ConversationRoomCommand, MessageDeleteCommand, MessageIdsCommand,
    MessageSendCommand, ServerMessage, COMMAND_CONVERSATION_JOIN, COMMAND_CONVERSATION_LEAVE,
    COMMAND_MESSAGE_DELETE, COMMAND_MESSAGE_DELIVERED, COMMAND_MESSAGE_READ, COMMAND_MESSAGE_SEND,
    COMMAND_PRESENCE_PING, COMMAND_TYPING_START, COMMAND_TYPING_STOP, EVENT_MESSAGE_DELETED,
    EVENT_MESSAGE_UNIFIED, EVENT_PRESENCE_JOINED, EVENT_PRESENCE_LEFT, EVENT_READY,
    EVENT_STATUS_UNIFIED, EVENT_TYPING_START, EVENT_TYPING_STOP, EVENT_USER_STATUS,
};
use super::{emit_to_conversation, emit_to_conversation_except_session};

/// JWT is passed as a query parameter because a WebSocket upgrade is a plain
/// GET request and cannot reliably carry an Authorization header across
/// every client environment.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// Validates the handshake token before upgrading — a rejected handshake
/// never allocates a session.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let user_id = match auth::authenticate_token(&params.token, &state.config.jwt_secret) {
        Ok(id) => id,
        Err(_) => return AppError::AuthFailed("invalid or expired token".into()).into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: i64, state: AppState) {
    let session_id = Uuid::new_v4();
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    state.connections.add(session_id, tx.clone()).await;
    let came_online = state.presence.attach(user_id, session_id).await;

    onboard(&state, user_id, session_id).await;
    announce_presence(&state, user_id, "online", came_online).await;

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let state_for_recv = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_stream.next().await {
            if let Message::Text(text) = message {
                handle_client_message(&state_for_recv, user_id, session_id, &text).await;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    cleanup(&state, user_id, session_id).await;
}

/// Delivers any messages that arrived for this user while they were
/// offline: promotes each to `delivered` and re-announces the resulting
/// read state to the whole conversation room, grouped so every conversation
/// only produces one `status:unified` event.
async fn onboard(state: &AppState, user_id: i64, session_id: Uuid) {
    let undelivered = match state.gateway.undelivered_for(user_id).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(error = ?e, user_id, "failed to load undelivered reads on connect");
            Vec::new()
        }
    };

    let mut by_conversation: std::collections::HashMap<i64, Vec<i64>> = Default::default();
    for row in undelivered {
        by_conversation
            .entry(row.conversation_id)
            .or_default()
            .push(row.read.message_id);
    }

    for (conversation_id, message_ids) in by_conversation {
        let transitioned = match state.messages.mark_delivered(&message_ids, user_id).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = ?e, conversation_id, "failed to mark onboarding reads delivered");
                continue;
            }
        };

        if transitioned.is_empty() {
            continue;
        }

        let participant_ids = match state.gateway.participants_of(conversation_id).await {
            Ok(ids) => ids,
            Err(_) => continue,
        };

        let updates: Vec<StatusUpdate> = transitioned
            .into_iter()
            .map(|r| StatusUpdate {
                message_id: r.message_id,
                user_id: r.user_id,
                status: r.status,
                read_at: r.read_at,
            })
            .collect();

        match events::build_unified_status(&state.gateway, conversation_id, updates, &participant_ids).await {
            Ok(event) => {
                if let Ok(msg) = ServerMessage::new(EVENT_STATUS_UNIFIED, event) {
                    let session_ids = state.presence.sessions_for_users(&participant_ids).await;
                    broadcast(state, &session_ids, &msg).await;
                }
            }
            Err(e) => tracing::warn!(error = ?e, conversation_id, "failed to build onboarding status event"),
        }
    }

    let payload = serde_json::json!({ "user_id": user_id, "session_id": session_id });
    if let Ok(msg) = ServerMessage::new(EVENT_READY, payload) {
        if let Ok(json) = serde_json::to_string(&msg) {
            state.connections.send_to_session(session_id, &json).await;
        }
    }
}

/// Persists the status transition and, only on an online/offline edge (not
/// merely a new session joining an already-online user), announces it to
/// the global room — every currently connected session, the same room
/// every socket implicitly joins at connect.
async fn announce_presence(state: &AppState, user_id: i64, status: &str, changed: bool) {
    if let Err(e) = state.gateway.set_user_status(user_id, status).await {
        tracing::warn!(error = ?e, user_id, status, "failed to persist presence status");
    }

    if !changed {
        return;
    }

    let payload = serde_json::json!({ "user_id": user_id, "status": status });
    if let Ok(msg) = ServerMessage::new(EVENT_USER_STATUS, payload) {
        super::emit_to_global(state, &msg).await;
    }
}

async fn handle_client_message(state: &AppState, user_id: i64, session_id: Uuid, text: &str) {
    let parsed: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(_) => {
            send_error(state, session_id, &AppError::Validation("malformed command frame".into())).await;
            return;
        }
    };

    // Transient persistence failures (pool timeout, dropped connection) are
    // retried a small bounded number of times before surfacing to the
    // sender, per the `Transient` error policy (spec §7); a `Transient`
    // error only ever occurs before a transaction has committed, so retrying
    // the whole dispatch cannot double-apply a mutation.
    let result = crate::db::with_retry(3, || dispatch(state, user_id, session_id, &parsed)).await;
    if let Err(e) = result {
        send_error(state, session_id, &e).await;
    }
}

async fn send_error(state: &AppState, session_id: Uuid, err: &AppError) {
    let msg = ServerMessage::error(err);
    if let Ok(json) = serde_json::to_string(&msg) {
        state.connections.send_to_session(session_id, &json).await;
    }
}

async fn dispatch(
    state: &AppState,
    user_id: i64,
    session_id: Uuid,
    message: &ClientMessage,
) -> Result<(), AppError> {
    match message.command.as_str() {
        COMMAND_MESSAGE_SEND => handle_message_send(state, user_id, message).await,
        COMMAND_MESSAGE_READ => handle_read_transition(state, user_id, message, ReadStatus::Read).await,
        COMMAND_MESSAGE_DELIVERED => {
            handle_read_transition(state, user_id, message, ReadStatus::Delivered).await
        }
        COMMAND_MESSAGE_DELETE => handle_message_delete(state, user_id, message).await,
        COMMAND_CONVERSATION_JOIN => handle_join(state, user_id, session_id, message).await,
        COMMAND_CONVERSATION_LEAVE => handle_leave(state, session_id, message).await,
        COMMAND_TYPING_START => handle_typing(state, user_id, session_id, message, true).await,
        COMMAND_TYPING_STOP => handle_typing(state, user_id, session_id, message, false).await,
        COMMAND_PRESENCE_PING => {
            announce_presence(state, user_id, "online", true).await;
            Ok(())
        }
        other => Err(AppError::Validation(format!("unknown command: {other}"))),
    }
}

async fn handle_message_send(state: &AppState, user_id: i64, message: &ClientMessage) -> Result<(), AppError> {
    let cmd: MessageSendCommand = serde_json::from_value(message.data.clone())
        .map_err(|_| AppError::Validation("invalid message.send payload".into()))?;

    let sent = state.messages.send(cmd.conversation_id, user_id, cmd.payload).await?;
    let message_id = sent.id;
    let participant_ids = state.gateway.participants_of(cmd.conversation_id).await?;

    // Split the other participants into active viewers (promoted straight to
    // `read`) and recipients who are merely online elsewhere (promoted to
    // `delivered`); anyone fully offline keeps the `sent` row the service
    // just wrote, to be caught by their own onboarding backlog on reconnect.
    let viewers = state.presence.viewers(cmd.conversation_id).await;
    for recipient_id in participant_ids.iter().copied().filter(|&id| id != user_id) {
        if viewers.contains(&recipient_id) {
            if let Err(e) = state.messages.mark_read(&[message_id], recipient_id).await {
                tracing::warn!(error = ?e, message_id, recipient_id, "failed to mark message read for viewer");
            }
        } else if state.presence.is_online(recipient_id).await {
            if let Err(e) = state.messages.mark_delivered(&[message_id], recipient_id).await {
                tracing::warn!(error = ?e, message_id, recipient_id, "failed to mark message delivered for online recipient");
            }
        }
    }

    let dto = state.gateway.hydrate_message_dto(sent).await?;
    let event = events::build_unified_message(&state.gateway, cmd.conversation_id, dto, &participant_ids).await?;
    if let Ok(msg) = ServerMessage::new(EVENT_MESSAGE_UNIFIED, event) {
        emit_to_conversation(state, &participant_ids, &msg).await;
    }

    Ok(())
}

async fn handle_read_transition(
    state: &AppState,
    user_id: i64,
    message: &ClientMessage,
    target: ReadStatus,
) -> Result<(), AppError> {
    let cmd: MessageIdsCommand = serde_json::from_value(message.data.clone())
        .map_err(|_| AppError::Validation("invalid payload: expected message_id or message_ids".into()))?;
    let message_ids = cmd.resolve();

    if message_ids.is_empty() {
        return Ok(());
    }

    let transitioned = match target {
        ReadStatus::Read => state.messages.mark_read(&message_ids, user_id).await?,
        ReadStatus::Delivered => state.messages.mark_delivered(&message_ids, user_id).await?,
        ReadStatus::Sent => return Ok(()),
    };

    if transitioned.is_empty() {
        return Ok(());
    }

    let conversation_id = state
        .gateway
        .get_message(transitioned[0].message_id)
        .await?
        .conversation_id;
    let participant_ids = state.gateway.participants_of(conversation_id).await?;

    let updates: Vec<StatusUpdate> = transitioned
        .into_iter()
        .map(|r| StatusUpdate {
            message_id: r.message_id,
            user_id: r.user_id,
            status: r.status,
            read_at: r.read_at,
        })
        .collect();

    let event = events::build_unified_status(&state.gateway, conversation_id, updates, &participant_ids).await?;
    if let Ok(msg) = ServerMessage::new(EVENT_STATUS_UNIFIED, event) {
        emit_to_conversation(state, &participant_ids, &msg).await;
    }

    Ok(())
}

async fn handle_message_delete(state: &AppState, user_id: i64, message: &ClientMessage) -> Result<(), AppError> {
    let cmd: MessageDeleteCommand = serde_json::from_value(message.data.clone())
        .map_err(|_| AppError::Validation("invalid message.delete payload".into()))?;

    let deleted = state.messages.delete(cmd.message_id, user_id).await?;
    let participant_ids = state.gateway.participants_of(deleted.conversation_id).await?;

    let event = events::build_unified_deletion(
        &state.gateway,
        deleted.conversation_id,
        vec![deleted.id],
        &participant_ids,
    )
    .await?;
    if let Ok(msg) = ServerMessage::new(EVENT_MESSAGE_DELETED, event) {
        emit_to_conversation(state, &participant_ids, &msg).await;
    }

    Ok(())
}

async fn handle_join(state: &AppState, user_id: i64, session_id: Uuid, message: &ClientMessage) -> Result<(), AppError> {
    let cmd: ConversationRoomCommand = serde_json::from_value(message.data.clone())
        .map_err(|_| AppError::Validation("invalid conversation.join payload".into()))?;

    if !state.gateway.is_participant(cmd.conversation_id, user_id).await? {
        return Err(AppError::Forbidden("not a participant in this conversation".into()));
    }

    if state.presence.join(session_id, cmd.conversation_id).await {
        let participant_ids = state.gateway.participants_of(cmd.conversation_id).await?;

        // First join: bulk-mark this conversation's unread messages as read
        // before announcing presence, so `status:unified` precedes `presence:joined`.
        let unread_ids = state
            .gateway
            .unread_message_ids(cmd.conversation_id, user_id)
            .await?;
        if !unread_ids.is_empty() {
            let transitioned = state.messages.mark_read(&unread_ids, user_id).await?;
            if !transitioned.is_empty() {
                let updates: Vec<StatusUpdate> = transitioned
                    .into_iter()
                    .map(|r| StatusUpdate {
                        message_id: r.message_id,
                        user_id: r.user_id,
                        status: r.status,
                        read_at: r.read_at,
                    })
                    .collect();
                let event =
                    events::build_unified_status(&state.gateway, cmd.conversation_id, updates, &participant_ids)
                        .await?;
                if let Ok(msg) = ServerMessage::new(EVENT_STATUS_UNIFIED, event) {
                    emit_to_conversation(state, &participant_ids, &msg).await;
                }
            }
        }

        let payload = serde_json::json!({ "conversation_id": cmd.conversation_id, "user_id": user_id });
        if let Ok(msg) = ServerMessage::new(EVENT_PRESENCE_JOINED, payload) {
            emit_to_conversation(state, &participant_ids, &msg).await;
        }
    }

    Ok(())
}

async fn handle_leave(state: &AppState, session_id: Uuid, message: &ClientMessage) -> Result<(), AppError> {
    let cmd: ConversationRoomCommand = serde_json::from_value(message.data.clone())
        .map_err(|_| AppError::Validation("invalid conversation.leave payload".into()))?;

    if state.presence.leave(session_id, cmd.conversation_id).await {
        let participant_ids = state
            .gateway
            .participants_of(cmd.conversation_id)
            .await
            .unwrap_or_default();
        let payload = serde_json::json!({ "conversation_id": cmd.conversation_id });
        if let Ok(msg) = ServerMessage::new(EVENT_PRESENCE_LEFT, payload) {
            emit_to_conversation(state, &participant_ids, &msg).await;
        }
    }

    Ok(())
}

/// `typing.start`/`typing.stop` reach the whole conversation room except the
/// originating session — the fan-out rule excludes only that one session,
/// not every session belonging to the sender.
async fn handle_typing(
    state: &AppState,
    user_id: i64,
    session_id: Uuid,
    message: &ClientMessage,
    starting: bool,
) -> Result<(), AppError> {
    let cmd: ConversationRoomCommand = serde_json::from_value(message.data.clone())
        .map_err(|_| AppError::Validation("invalid typing payload".into()))?;

    if starting && !state.presence.throttle_typing(cmd.conversation_id, user_id).await {
        return Ok(());
    }

    let participant_ids = state.gateway.participants_of(cmd.conversation_id).await?;
    let event_name = if starting { EVENT_TYPING_START } else { EVENT_TYPING_STOP };
    let payload = serde_json::json!({ "conversation_id": cmd.conversation_id, "user_id": user_id });

    if let Ok(msg) = ServerMessage::new(event_name, payload) {
        emit_to_conversation_except_session(state, &participant_ids, session_id, &msg).await;
    }

    Ok(())
}

async fn cleanup(state: &AppState, user_id: i64, session_id: Uuid) {
    state.connections.remove(session_id).await;

    for conversation_id in state.presence.joined_conversations(session_id).await {
        if state.presence.leave(session_id, conversation_id).await {
            let participant_ids = state
                .gateway
                .participants_of(conversation_id)
                .await
                .unwrap_or_default();
            let payload = serde_json::json!({ "conversation_id": conversation_id });
            if let Ok(msg) = ServerMessage::new(EVENT_PRESENCE_LEFT, payload) {
                emit_to_conversation(state, &participant_ids, &msg).await;
            }
        }
    }

    if state.presence.detach(user_id, session_id).await {
        state.presence.clear_typing_throttle(user_id).await;
        announce_presence(state, user_id, "offline", true).await;
    }
}

async fn broadcast(state: &AppState, session_ids: &[Uuid], msg: &ServerMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => state.connections.broadcast_to_sessions(session_ids, &json).await,
        Err(e) => tracing::error!(error = ?e, event = msg.event, "failed to serialize outbound event"),
    }
}
