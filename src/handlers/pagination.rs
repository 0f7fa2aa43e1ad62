//! HTTP pagination surface (C7): cursor-paged reads over conversations and
//! messages. Mutation — sending, deleting, read-state transitions — all
//! happens over the WebSocket hub; these routes are read-only.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, MessageDto, UserDto};
use crate::services::conversation::ConversationSummary;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub before: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct OpenConversationRequest {
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
struct ConversationSummaryDto {
    id: i64,
    other_participant: UserDto,
    last_message: Option<MessageDto>,
    unread_count: i64,
    updated_at: chrono::DateTime<chrono::Utc>,
    cursor: String,
}

impl From<ConversationSummary> for ConversationSummaryDto {
    fn from(s: ConversationSummary) -> Self {
        let cursor = crate::cursor::encode_conversation_cursor(s.updated_at, s.id);
        ConversationSummaryDto {
            id: s.id,
            other_participant: s.other_participant,
            last_message: s.last_message,
            unread_count: s.unread_count,
            updated_at: s.updated_at,
            cursor,
        }
    }
}

pub async fn list_conversations(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Value>> {
    let limit = query.limit.unwrap_or(20);
    let (summaries, has_more) = state
        .conversations
        .list(user.user_id(), query.before.as_deref(), limit)
        .await?;

    let items: Vec<ConversationSummaryDto> = summaries.into_iter().map(Into::into).collect();
    let next_cursor = items.last().map(|c| c.cursor.clone());

    Ok(Json(json!({
        "items": items,
        "has_more": has_more,
        "next_cursor": next_cursor,
    })))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<i64>,
) -> AppResult<Json<ConversationSummaryDto>> {
    let summary = state
        .conversations
        .get(conversation_id, user.user_id())
        .await?;

    Ok(Json(summary.into()))
}

pub async fn open_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<OpenConversationRequest>,
) -> AppResult<Json<Conversation>> {
    let conversation = state
        .conversations
        .create_or_get_1to1(user.user_id(), body.user_id)
        .await?;

    Ok(Json(conversation))
}

pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Value>> {
    let limit = query.limit.unwrap_or(50);
    let (messages, has_more) = state
        .messages
        .paginate(conversation_id, user.user_id(), query.before.as_deref(), limit)
        .await?;

    let next_cursor = messages
        .last()
        .map(|m| crate::cursor::encode_message_cursor(m.id));
    let items = state.gateway.hydrate_message_dtos(messages).await?;

    Ok(Json(json!({
        "items": items,
        "has_more": has_more,
        "next_cursor": next_cursor,
    })))
}

pub async fn search_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<i64>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Value>> {
    if query.q.trim().is_empty() {
        return Err(AppError::Validation("search query must not be empty".into()));
    }

    let limit = query.limit.unwrap_or(20);
    let messages = state
        .messages
        .search(conversation_id, user.user_id(), &query.q, limit)
        .await?;

    let items = state.gateway.hydrate_message_dtos(messages).await?;
    Ok(Json(json!({ "items": items })))
}
