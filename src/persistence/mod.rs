//! Persistence Gateway (C1): transactional access to users, conversations,
//! participants, messages, and message-reads. Callers never write raw SQL
//! against these tables outside this module.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{AppError, AppResult};
use crate::models::{Message, MessageDto, MessageRead, MessageType, ReadStatus};

#[derive(Clone)]
pub struct PersistenceGateway {
    pool: PgPool,
}

/// Fields needed to insert one message; validated by `MessageService` before
/// reaching the gateway (the gateway trusts its caller and leans on the
/// database CHECK constraints as the last line of defense).
pub struct CreateMessageInput {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub message_type: MessageType,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_mime_type: Option<String>,
    pub media_duration: Option<f64>,
    pub waveform: Option<serde_json::Value>,
    pub reply_to_id: Option<i64>,
}

/// An undelivered read row paired with the conversation its message belongs
/// to, so the hub's onboarding step can group the resulting status update by
/// conversation room without a second query.
pub struct UndeliveredRead {
    pub read: MessageRead,
    pub conversation_id: i64,
}

impl PersistenceGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Opens the single transaction scope every multi-statement gateway
    /// operation below runs under (spec's `withTx`). Sqlx's pool-backed
    /// transactions are already `'static`, so callers hold on to this and
    /// pass `&mut tx` through a chain of gateway calls before committing.
    pub async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(AppError::from)
    }

    pub async fn is_participant(&self, conversation_id: i64, user_id: i64) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM conversation_participants
                 WHERE conversation_id = $1 AND user_id = $2
             )",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    pub async fn get_user(&self, user_id: i64) -> AppResult<crate::models::User> {
        sqlx::query_as::<_, crate::models::User>(
            "SELECT id, email, name, avatar_url, status, last_seen FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))
    }

    pub async fn get_conversation(&self, conversation_id: i64) -> AppResult<crate::models::Conversation> {
        sqlx::query_as::<_, crate::models::Conversation>(
            "SELECT id, last_message_id, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("conversation not found".into()))
    }

    pub async fn get_message(&self, message_id: i64) -> AppResult<Message> {
        sqlx::query_as::<_, Message>(
            "SELECT id, conversation_id, sender_id, type, content, media_url,
                    media_mime_type, media_duration, waveform, reply_to_id,
                    is_deleted, deleted_at, created_at
             FROM messages WHERE id = $1",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("message not found".into()))
    }

    /// Persists `status` (and bumps `last_seen`) for `user_id`. Used by the
    /// hub on connect/disconnect; failures here are logged by the caller and
    /// never block the socket lifecycle transition that triggered them.
    pub async fn set_user_status(&self, user_id: i64, status: &str) -> AppResult<()> {
        sqlx::query("UPDATE users SET status = $1, last_seen = NOW() WHERE id = $2")
            .bind(status)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn participants_of(&self, conversation_id: i64) -> AppResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Inserts one message, one `sent` read row per other participant, and
    /// bumps `conversations.last_message_id` / `updated_at` — all three
    /// writes commit atomically with the caller's transaction.
    pub async fn create_message_and_reads(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        input: CreateMessageInput,
    ) -> AppResult<Message> {
        let message = sqlx::query_as::<_, Message>(
            "INSERT INTO messages
                (conversation_id, sender_id, type, content, media_url, media_mime_type,
                 media_duration, waveform, reply_to_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id, conversation_id, sender_id, type, content, media_url,
                       media_mime_type, media_duration, waveform, reply_to_id,
                       is_deleted, deleted_at, created_at",
        )
        .bind(input.conversation_id)
        .bind(input.sender_id)
        .bind(input.message_type)
        .bind(&input.content)
        .bind(&input.media_url)
        .bind(&input.media_mime_type)
        .bind(input.media_duration)
        .bind(&input.waveform)
        .bind(input.reply_to_id)
        .fetch_one(&mut **tx)
        .await?;

        // Duplicate read rows from a retried send are silently ignored.
        sqlx::query(
            "INSERT INTO message_reads (message_id, user_id, status)
             SELECT $1, cp.user_id, 'sent'
             FROM conversation_participants cp
             WHERE cp.conversation_id = $2 AND cp.user_id != $3
             ON CONFLICT (message_id, user_id) DO NOTHING",
        )
        .bind(message.id)
        .bind(input.conversation_id)
        .bind(input.sender_id)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            "UPDATE conversations SET last_message_id = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(message.id)
        .bind(input.conversation_id)
        .execute(&mut **tx)
        .await?;

        Ok(message)
    }

    /// Row-locks the user's read rows for `message_ids` and promotes each
    /// toward `target`, refusing regressions. Returns only the rows that
    /// actually transitioned.
    pub async fn transition_reads(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message_ids: &[i64],
        user_id: i64,
        target: ReadStatus,
    ) -> AppResult<Vec<MessageRead>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        let locked = sqlx::query_as::<_, MessageRead>(
            "SELECT id, message_id, user_id, status, read_at
             FROM message_reads
             WHERE message_id = ANY($1) AND user_id = $2
             FOR UPDATE",
        )
        .bind(message_ids)
        .bind(user_id)
        .fetch_all(&mut **tx)
        .await?;

        let mut transitioned = Vec::new();
        for row in locked {
            if row.status >= target {
                continue;
            }

            let read_at = if target == ReadStatus::Read {
                Some(Utc::now())
            } else {
                row.read_at
            };

            let updated = sqlx::query_as::<_, MessageRead>(
                "UPDATE message_reads SET status = $1, read_at = $2
                 WHERE id = $3
                 RETURNING id, message_id, user_id, status, read_at",
            )
            .bind(target)
            .bind(read_at)
            .bind(row.id)
            .fetch_one(&mut **tx)
            .await?;

            transitioned.push(updated);
        }

        Ok(transitioned)
    }

    /// Returns up to `limit` messages older than `before_id` (or the newest
    /// page if omitted), ordered `id DESC`, plus whether an older page
    /// exists. Fetches one extra row to answer `hasPrevious` without a
    /// second round trip.
    pub async fn fetch_messages_before(
        &self,
        conversation_id: i64,
        before_id: Option<i64>,
        limit: i64,
    ) -> AppResult<(Vec<Message>, bool)> {
        let fetch_limit = limit + 1;

        let mut messages = if let Some(before_id) = before_id {
            sqlx::query_as::<_, Message>(
                "SELECT id, conversation_id, sender_id, type, content, media_url,
                        media_mime_type, media_duration, waveform, reply_to_id,
                        is_deleted, deleted_at, created_at
                 FROM messages
                 WHERE conversation_id = $1 AND id < $2
                 ORDER BY id DESC
                 LIMIT $3",
            )
            .bind(conversation_id)
            .bind(before_id)
            .bind(fetch_limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, Message>(
                "SELECT id, conversation_id, sender_id, type, content, media_url,
                        media_mime_type, media_duration, waveform, reply_to_id,
                        is_deleted, deleted_at, created_at
                 FROM messages
                 WHERE conversation_id = $1
                 ORDER BY id DESC
                 LIMIT $2",
            )
            .bind(conversation_id)
            .bind(fetch_limit)
            .fetch_all(&self.pool)
            .await?
        };

        let has_previous = messages.len() as i64 > limit;
        messages.truncate(limit as usize);

        Ok((messages, has_previous))
    }

    /// Maps each of `user_ids` to their unread count in `conversation_id`:
    /// non-deleted messages whose read row is still `sent` or `delivered`.
    pub async fn unread_counts(
        &self,
        conversation_id: i64,
        user_ids: &[i64],
    ) -> AppResult<HashMap<i64, i64>> {
        let mut counts: HashMap<i64, i64> = user_ids.iter().map(|&id| (id, 0)).collect();

        if user_ids.is_empty() {
            return Ok(counts);
        }

        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT mr.user_id, COUNT(*)
             FROM message_reads mr
             JOIN messages m ON m.id = mr.message_id
             WHERE m.conversation_id = $1
               AND m.is_deleted = FALSE
               AND mr.user_id = ANY($2)
               AND mr.status IN ('sent', 'delivered')
             GROUP BY mr.user_id",
        )
        .bind(conversation_id)
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        for (user_id, count) in rows {
            counts.insert(user_id, count);
        }

        Ok(counts)
    }

    /// Message ids in `conversation_id` whose read row for `user_id` is not
    /// yet `read`, on non-deleted messages. Used to bulk-mark a conversation
    /// as read the moment a user joins its room.
    pub async fn unread_message_ids(&self, conversation_id: i64, user_id: i64) -> AppResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT mr.message_id
             FROM message_reads mr
             JOIN messages m ON m.id = mr.message_id
             WHERE m.conversation_id = $1
               AND mr.user_id = $2
               AND m.is_deleted = FALSE
               AND mr.status != 'read'",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Every read row recorded against `message_id`, one per recipient.
    pub async fn reads_for_message(&self, message_id: i64) -> AppResult<Vec<MessageRead>> {
        let reads = sqlx::query_as::<_, MessageRead>(
            "SELECT id, message_id, user_id, status, read_at
             FROM message_reads
             WHERE message_id = $1",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(reads)
    }

    /// Builds the full `MessageDto` contract: base fields, a shallow
    /// (one-hop, itself un-hydrated) reply target, and every recipient's
    /// current read row.
    pub async fn hydrate_message_dto(&self, message: Message) -> AppResult<MessageDto> {
        let reply_to = match message.reply_to_id {
            Some(reply_to_id) => Some(Box::new(MessageDto::from(self.get_message(reply_to_id).await?))),
            None => None,
        };
        let reads = self.reads_for_message(message.id).await?;

        let mut dto = MessageDto::from(message);
        dto.reply_to = reply_to;
        dto.reads = reads;
        Ok(dto)
    }

    /// [`hydrate_message_dto`](Self::hydrate_message_dto) over a page of
    /// messages, in order.
    pub async fn hydrate_message_dtos(&self, messages: Vec<Message>) -> AppResult<Vec<MessageDto>> {
        let mut dtos = Vec::with_capacity(messages.len());
        for message in messages {
            dtos.push(self.hydrate_message_dto(message).await?);
        }
        Ok(dtos)
    }

    /// All `sent` read rows for `user_id` on non-deleted messages, with each
    /// message's conversation id so the caller can group by room.
    pub async fn undelivered_for(&self, user_id: i64) -> AppResult<Vec<UndeliveredRead>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: i64,
            message_id: i64,
            user_id: i64,
            status: ReadStatus,
            read_at: Option<chrono::DateTime<Utc>>,
            conversation_id: i64,
        }

        let rows = sqlx::query_as::<_, Row>(
            "SELECT mr.id, mr.message_id, mr.user_id, mr.status, mr.read_at,
                    m.conversation_id
             FROM message_reads mr
             JOIN messages m ON m.id = mr.message_id
             WHERE mr.user_id = $1 AND mr.status = 'sent' AND m.is_deleted = FALSE",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| UndeliveredRead {
                read: MessageRead {
                    id: r.id,
                    message_id: r.message_id,
                    user_id: r.user_id,
                    status: r.status,
                    read_at: r.read_at,
                },
                conversation_id: r.conversation_id,
            })
            .collect())
    }
}
