use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use strum::{Display, EnumString};

// ============================================================================
// User Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub status: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UserDto {
    pub id: i64,
    pub name: String,
    pub avatar_url: Option<String>,
    pub status: String,
    pub last_seen: DateTime<Utc>,
}

impl From<User> for UserDto {
    fn from(user: User) -> Self {
        UserDto {
            id: user.id,
            name: user.name,
            avatar_url: user.avatar_url,
            status: user.status,
            last_seen: user.last_seen,
        }
    }
}

// ============================================================================
// Conversation Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Conversation {
    pub id: i64,
    pub last_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ConversationParticipant {
    pub conversation_id: i64,
    pub user_id: i64,
}

/// A conversation as seen by one of its two participants: the `updated_at`
/// based cursor field lives alongside the other participant's summary so a
/// client can render an inbox list without a second round trip.
#[derive(Debug, Serialize)]
pub struct ConversationDto {
    pub id: i64,
    pub other_participant: UserDto,
    pub last_message: Option<MessageDto>,
    pub unread_count: i64,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Message Models
// ============================================================================

/// A message's content kind. Stored as `TEXT` (not a native Postgres enum)
/// so a new variant never requires an `ALTER TYPE` migration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Display, EnumString,
)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Audio,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    #[sqlx(rename = "type")]
    pub message_type: MessageType,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_mime_type: Option<String>,
    pub media_duration: Option<f64>,
    pub waveform: Option<serde_json::Value>,
    pub reply_to_id: Option<i64>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// `reply_to` and `reads` are left empty by the plain `From<Message>`
/// conversion below — they require a database round trip the conversion
/// can't make. Production call sites hydrate them through
/// `PersistenceGateway::hydrate_message_dto`, which fills `reply_to` with a
/// *shallow* one-hop DTO (the reply target's own `reply_to`/`reads` stay
/// empty, so a reply chain never recurses) and `reads` with every
/// recipient's current read row, so a client can render a reply quote and
/// read receipts from this one payload.
#[derive(Debug, Serialize)]
pub struct MessageDto {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_mime_type: Option<String>,
    pub media_duration: Option<f64>,
    pub waveform: Option<serde_json::Value>,
    pub reply_to_id: Option<i64>,
    pub reply_to: Option<Box<MessageDto>>,
    pub reads: Vec<MessageRead>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageDto {
    fn from(m: Message) -> Self {
        // A deleted message's body is never exposed to clients, only the
        // tombstone flag (see MessageService::delete).
        if m.is_deleted {
            MessageDto {
                id: m.id,
                conversation_id: m.conversation_id,
                sender_id: m.sender_id,
                message_type: m.message_type,
                content: None,
                media_url: None,
                media_mime_type: None,
                media_duration: None,
                waveform: None,
                reply_to_id: m.reply_to_id,
                reply_to: None,
                reads: Vec::new(),
                is_deleted: true,
                created_at: m.created_at,
            }
        } else {
            MessageDto {
                id: m.id,
                conversation_id: m.conversation_id,
                sender_id: m.sender_id,
                message_type: m.message_type,
                content: m.content,
                media_url: m.media_url,
                media_mime_type: m.media_mime_type,
                media_duration: m.media_duration,
                waveform: m.waveform,
                reply_to_id: m.reply_to_id,
                reply_to: None,
                reads: Vec::new(),
                is_deleted: false,
                created_at: m.created_at,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageDto {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_mime_type: Option<String>,
    pub media_duration: Option<f64>,
    pub waveform: Option<serde_json::Value>,
    pub reply_to_id: Option<i64>,
}

// ============================================================================
// MessageRead Models
// ============================================================================

/// Per-recipient delivery state of a message. Declaration order doubles as
/// the monotonic ordering used to reject status regressions (see
/// PersistenceGateway::transition_reads) — `Sent < Delivered < Read`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    sqlx::Type,
    Display,
    EnumString,
)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReadStatus {
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MessageRead {
    pub id: i64,
    pub message_id: i64,
    pub user_id: i64,
    pub status: ReadStatus,
    pub read_at: Option<DateTime<Utc>>,
}
