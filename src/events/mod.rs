//! Event Consolidator (C5): builds the three unified event shapes, each
//! carrying enough state for any recipient to refresh its UI without a
//! follow-up query.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AppResult;
use crate::models::{MessageDto, ReadStatus};
use crate::persistence::PersistenceGateway;

#[derive(Debug, Serialize, Clone)]
pub struct ConversationUpdate {
    pub user_id: i64,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct UnifiedMessage {
    pub conversation_id: i64,
    pub message: MessageDto,
    pub conversation_updates: Vec<ConversationUpdate>,
}

#[derive(Debug, Serialize)]
pub struct StatusUpdate {
    pub message_id: i64,
    pub user_id: i64,
    pub status: ReadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct UnifiedStatus {
    pub conversation_id: i64,
    pub updates: Vec<StatusUpdate>,
    pub conversation_updates: Vec<ConversationUpdate>,
}

#[derive(Debug, Serialize)]
pub struct UnifiedDeletion {
    pub conversation_id: i64,
    pub deleted_message_ids: Vec<i64>,
    pub conversation_updates: Vec<ConversationUpdate>,
}

/// Reads unread counts for `participant_ids` **after** the triggering
/// mutation has committed, so no recipient ever observes a stale count in
/// the event it is about to receive.
async fn conversation_updates(
    gateway: &PersistenceGateway,
    conversation_id: i64,
    participant_ids: &[i64],
) -> AppResult<Vec<ConversationUpdate>> {
    let counts = gateway.unread_counts(conversation_id, participant_ids).await?;

    Ok(participant_ids
        .iter()
        .map(|&user_id| ConversationUpdate {
            user_id,
            unread_count: *counts.get(&user_id).unwrap_or(&0),
        })
        .collect())
}

pub async fn build_unified_message(
    gateway: &PersistenceGateway,
    conversation_id: i64,
    message: MessageDto,
    participant_ids: &[i64],
) -> AppResult<UnifiedMessage> {
    Ok(UnifiedMessage {
        conversation_id,
        message,
        conversation_updates: conversation_updates(gateway, conversation_id, participant_ids).await?,
    })
}

pub async fn build_unified_status(
    gateway: &PersistenceGateway,
    conversation_id: i64,
    updates: Vec<StatusUpdate>,
    participant_ids: &[i64],
) -> AppResult<UnifiedStatus> {
    Ok(UnifiedStatus {
        conversation_id,
        updates,
        conversation_updates: conversation_updates(gateway, conversation_id, participant_ids).await?,
    })
}

pub async fn build_unified_deletion(
    gateway: &PersistenceGateway,
    conversation_id: i64,
    deleted_message_ids: Vec<i64>,
    participant_ids: &[i64],
) -> AppResult<UnifiedDeletion> {
    Ok(UnifiedDeletion {
        conversation_id,
        deleted_message_ids,
        conversation_updates: conversation_updates(gateway, conversation_id, participant_ids).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_update_omits_read_at_when_absent() {
        let update = StatusUpdate {
            message_id: 1,
            user_id: 2,
            status: ReadStatus::Delivered,
            read_at: None,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("read_at").is_none());
    }

    #[test]
    fn status_update_includes_read_at_when_present() {
        let update = StatusUpdate {
            message_id: 1,
            user_id: 2,
            status: ReadStatus::Read,
            read_at: Some(Utc::now()),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("read_at").is_some());
    }
}
