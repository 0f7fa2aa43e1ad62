//! Conversation Service (C3): fetch a conversation with participants and
//! last message, create-or-get 1:1, and list with cursor pagination.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::cursor;
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, MessageDto, UserDto};
use crate::persistence::PersistenceGateway;

pub const MAX_LIST_LIMIT: i64 = 50;

/// A conversation summary as seen by one of its two participants.
pub struct ConversationSummary {
    pub id: i64,
    pub other_participant: UserDto,
    pub last_message: Option<MessageDto>,
    pub unread_count: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ConversationService {
    gateway: PersistenceGateway,
}

impl ConversationService {
    pub fn new(gateway: PersistenceGateway) -> Self {
        Self { gateway }
    }

    pub async fn get(&self, conversation_id: i64, caller_id: i64) -> AppResult<ConversationSummary> {
        if !self.gateway.is_participant(conversation_id, caller_id).await? {
            return Err(AppError::Forbidden(
                "caller is not a participant in this conversation".into(),
            ));
        }

        let conversation = self.gateway.get_conversation(conversation_id).await?;
        let participants = self.gateway.participants_of(conversation_id).await?;
        let other_id = participants
            .into_iter()
            .find(|&id| id != caller_id)
            .ok_or(AppError::Internal)?;
        let other_user = self.gateway.get_user(other_id).await?;

        let last_message = match conversation.last_message_id {
            Some(id) => {
                let message = self.gateway.get_message(id).await?;
                Some(self.gateway.hydrate_message_dto(message).await?)
            }
            None => None,
        };

        let counts = self
            .gateway
            .unread_counts(conversation_id, &[caller_id])
            .await?;
        let unread_count = *counts.get(&caller_id).unwrap_or(&0);

        Ok(ConversationSummary {
            id: conversation.id,
            other_participant: other_user.into(),
            last_message,
            unread_count,
            updated_at: conversation.updated_at,
        })
    }

    /// Lists conversations `user_id` participates in, ordered newest-active
    /// first, walking the composite `(updatedAt, id)` cursor C7 defines.
    pub async fn list(
        &self,
        user_id: i64,
        before_cursor: Option<&str>,
        limit: i64,
    ) -> AppResult<(Vec<ConversationSummary>, bool)> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let fetch_limit = limit + 1;

        let cursor_pair = before_cursor
            .map(cursor::decode_conversation_cursor)
            .transpose()?;

        let rows = if let Some((updated_at, id)) = cursor_pair {
            sqlx::query_as::<_, Conversation>(
                "SELECT c.id, c.last_message_id, c.created_at, c.updated_at
                 FROM conversations c
                 JOIN conversation_participants cp ON cp.conversation_id = c.id
                 WHERE cp.user_id = $1 AND (c.updated_at, c.id) < ($2, $3)
                 ORDER BY c.updated_at DESC, c.id DESC
                 LIMIT $4",
            )
            .bind(user_id)
            .bind(updated_at)
            .bind(id)
            .bind(fetch_limit)
            .fetch_all(self.gateway.pool())
            .await?
        } else {
            sqlx::query_as::<_, Conversation>(
                "SELECT c.id, c.last_message_id, c.created_at, c.updated_at
                 FROM conversations c
                 JOIN conversation_participants cp ON cp.conversation_id = c.id
                 WHERE cp.user_id = $1
                 ORDER BY c.updated_at DESC, c.id DESC
                 LIMIT $2",
            )
            .bind(user_id)
            .bind(fetch_limit)
            .fetch_all(self.gateway.pool())
            .await?
        };

        let has_more = rows.len() as i64 > limit;
        let mut rows = rows;
        rows.truncate(limit as usize);

        let mut summaries = Vec::with_capacity(rows.len());
        for conversation in rows {
            summaries.push(self.get(conversation.id, user_id).await?);
        }

        Ok((summaries, has_more))
    }

    /// Refuses `a == b`; looks up the conversation whose participant pair
    /// is exactly `{a,b}`; creates it on first call. A concurrent second
    /// caller loses the unique-constraint race on `direct_conversation_pairs`
    /// and falls back to the row the winner just created.
    pub async fn create_or_get_1to1(&self, a: i64, b: i64) -> AppResult<Conversation> {
        if a == b {
            return Err(AppError::Validation(
                "cannot open a conversation with oneself".into(),
            ));
        }

        let (low, high) = if a < b { (a, b) } else { (b, a) };

        if let Some(conversation) = Self::find_pair(self.gateway.pool(), low, high).await? {
            return Ok(conversation);
        }

        let mut tx = self.gateway.begin().await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations DEFAULT VALUES
             RETURNING id, last_message_id, created_at, updated_at",
        )
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, user_id)
             VALUES ($1, $2), ($1, $3)",
        )
        .bind(conversation.id)
        .bind(low)
        .bind(high)
        .execute(&mut *tx)
        .await?;

        let pair_insert = sqlx::query(
            "INSERT INTO direct_conversation_pairs (low_user_id, high_user_id, conversation_id)
             VALUES ($1, $2, $3)",
        )
        .bind(low)
        .bind(high)
        .bind(conversation.id)
        .execute(&mut *tx)
        .await;

        match pair_insert {
            Ok(_) => {
                tx.commit().await.map_err(AppError::from)?;
                Ok(conversation)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                // Lost the create race: someone else committed first. Roll
                // back this attempt's half-built conversation and return
                // theirs instead.
                drop(tx);
                Self::find_pair(self.gateway.pool(), low, high)
                    .await?
                    .ok_or(AppError::Internal)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_pair(pool: &PgPool, low: i64, high: i64) -> AppResult<Option<Conversation>> {
        let row = sqlx::query_as::<_, Conversation>(
            "SELECT c.id, c.last_message_id, c.created_at, c.updated_at
             FROM conversations c
             JOIN direct_conversation_pairs p ON p.conversation_id = c.id
             WHERE p.low_user_id = $1 AND p.high_user_id = $2",
        )
        .bind(low)
        .bind(high)
        .fetch_optional(pool)
        .await?;

        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_limit_constant_matches_spec_ceiling() {
        assert_eq!(MAX_LIST_LIMIT, 50);
    }
}
