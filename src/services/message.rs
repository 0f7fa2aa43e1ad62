//! Message Service (C2): enforces message invariants and drives the
//! per-recipient read-state machine.

use crate::cursor;
use crate::error::{AppError, AppResult};
use crate::models::{Message, MessageRead, MessageType, ReadStatus, SendMessageDto};
use crate::persistence::{CreateMessageInput, PersistenceGateway};

pub const MAX_PAGE_LIMIT: i64 = 100;
pub const MAX_SEARCH_LIMIT: i64 = 20;

#[derive(Clone)]
pub struct MessageService {
    gateway: PersistenceGateway,
}

impl MessageService {
    pub fn new(gateway: PersistenceGateway) -> Self {
        Self { gateway }
    }

    fn validate_payload(payload: &SendMessageDto) -> AppResult<()> {
        match payload.message_type {
            MessageType::Text => {
                if payload.content.as_deref().unwrap_or("").is_empty() {
                    return Err(AppError::Validation(
                        "text messages require non-empty content".into(),
                    ));
                }
            }
            MessageType::Image | MessageType::Audio => {
                if payload.media_url.as_deref().unwrap_or("").is_empty() {
                    return Err(AppError::Validation(
                        "media messages require a non-empty media_url".into(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Verifies membership and payload shape, then inserts the message and
    /// one `sent` read per other participant in a single transaction.
    ///
    /// The hub is responsible for any further read-state promotion driven
    /// by live presence (active viewers get `read`, online-elsewhere
    /// recipients get `delivered`) — this only ever leaves fresh rows at
    /// `sent`, per the persistence gateway's contract.
    pub async fn send(
        &self,
        conversation_id: i64,
        sender_id: i64,
        payload: SendMessageDto,
    ) -> AppResult<Message> {
        if !self.gateway.is_participant(conversation_id, sender_id).await? {
            return Err(AppError::Forbidden(
                "sender is not a participant in this conversation".into(),
            ));
        }

        Self::validate_payload(&payload)?;

        if let Some(reply_to_id) = payload.reply_to_id {
            let target = self.gateway.get_message(reply_to_id).await?;
            if target.conversation_id != conversation_id {
                return Err(AppError::Validation(
                    "reply target is not in this conversation".into(),
                ));
            }
        }

        let mut tx = self.gateway.begin().await?;
        let message = self
            .gateway
            .create_message_and_reads(
                &mut tx,
                CreateMessageInput {
                    conversation_id,
                    sender_id,
                    message_type: payload.message_type,
                    content: payload.content,
                    media_url: payload.media_url,
                    media_mime_type: payload.media_mime_type,
                    media_duration: payload.media_duration,
                    waveform: payload.waveform,
                    reply_to_id: payload.reply_to_id,
                },
            )
            .await?;
        tx.commit().await.map_err(AppError::from)?;

        Ok(message)
    }

    /// Soft-deletes a message owned by `caller_id`. Read rows are left
    /// untouched; the deleted message simply drops out of unread counts
    /// because those queries already exclude `is_deleted` rows.
    pub async fn delete(&self, message_id: i64, caller_id: i64) -> AppResult<Message> {
        let message = self.gateway.get_message(message_id).await?;

        if message.sender_id != caller_id {
            return Err(AppError::Forbidden(
                "only the sender can delete this message".into(),
            ));
        }

        if message.is_deleted {
            return Ok(message);
        }

        let updated = sqlx::query_as::<_, Message>(
            "UPDATE messages SET is_deleted = TRUE, deleted_at = NOW()
             WHERE id = $1
             RETURNING id, conversation_id, sender_id, type, content, media_url,
                       media_mime_type, media_duration, waveform, reply_to_id,
                       is_deleted, deleted_at, created_at",
        )
        .bind(message_id)
        .fetch_one(self.gateway.pool())
        .await?;

        Ok(updated)
    }

    /// Returns a newest-first page of messages plus whether an older page
    /// exists. `before_cursor` is the opaque cursor C7 defines — a decimal
    /// message id.
    pub async fn paginate(
        &self,
        conversation_id: i64,
        caller_id: i64,
        before_cursor: Option<&str>,
        limit: i64,
    ) -> AppResult<(Vec<Message>, bool)> {
        if !self.gateway.is_participant(conversation_id, caller_id).await? {
            return Err(AppError::Forbidden(
                "caller is not a participant in this conversation".into(),
            ));
        }

        let before_id = before_cursor.map(cursor::decode_message_cursor).transpose()?;
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);

        self.gateway
            .fetch_messages_before(conversation_id, before_id, limit)
            .await
    }

    /// Row-locks and promotes the caller's read rows for `message_ids` to
    /// `read`. Idempotent: rows already at `read` are left alone; rows
    /// belonging to another user or a nonexistent message are silently
    /// ignored by the gateway's `WHERE user_id = $2` filter.
    pub async fn mark_read(&self, message_ids: &[i64], user_id: i64) -> AppResult<Vec<MessageRead>> {
        self.transition(message_ids, user_id, ReadStatus::Read).await
    }

    /// Same pattern, targeting `delivered`; the gateway's monotonic check
    /// refuses to move a `read` row back to `delivered`.
    pub async fn mark_delivered(
        &self,
        message_ids: &[i64],
        user_id: i64,
    ) -> AppResult<Vec<MessageRead>> {
        self.transition(message_ids, user_id, ReadStatus::Delivered).await
    }

    async fn transition(
        &self,
        message_ids: &[i64],
        user_id: i64,
        target: ReadStatus,
    ) -> AppResult<Vec<MessageRead>> {
        let mut tx = self.gateway.begin().await?;
        let transitioned = self
            .gateway
            .transition_reads(&mut tx, message_ids, user_id, target)
            .await?;
        tx.commit().await.map_err(AppError::from)?;

        Ok(transitioned)
    }

    /// Case-insensitive substring match on `content`, newest first. Out of
    /// primary scope for depth but part of the public contract.
    pub async fn search(
        &self,
        conversation_id: i64,
        caller_id: i64,
        query: &str,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        if !self.gateway.is_participant(conversation_id, caller_id).await? {
            return Err(AppError::Forbidden(
                "caller is not a participant in this conversation".into(),
            ));
        }

        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));

        let messages = sqlx::query_as::<_, Message>(
            "SELECT id, conversation_id, sender_id, type, content, media_url,
                    media_mime_type, media_duration, waveform, reply_to_id,
                    is_deleted, deleted_at, created_at
             FROM messages
             WHERE conversation_id = $1 AND is_deleted = FALSE AND content ILIKE $2
             ORDER BY created_at DESC, id DESC
             LIMIT $3",
        )
        .bind(conversation_id)
        .bind(pattern)
        .bind(limit)
        .fetch_all(self.gateway.pool())
        .await?;

        Ok(messages)
    }
}
