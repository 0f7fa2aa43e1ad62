//! Wire envelope for the hub's single WebSocket stream: a generic
//! `{command, data}` / `{event, data}` wrapper, the same shape the original
//! gateway protocol used, now carrying this domain's commands and events
//! instead of Discord-style dispatch payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::models::SendMessageDto;

/// An inbound frame from the client. `data` is re-parsed into the typed
/// payload matching `command` once the hub has matched on the string.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

/// An outbound frame to the client.
#[derive(Debug, Serialize)]
pub struct ServerMessage {
    pub event: &'static str,
    pub data: Value,
}

impl ServerMessage {
    pub fn new(event: &'static str, data: impl Serialize) -> AppResult<Self> {
        let data = serde_json::to_value(data).map_err(|_| AppError::Internal)?;
        Ok(ServerMessage { event, data })
    }

    pub fn error(err: &AppError) -> Self {
        ServerMessage {
            event: EVENT_ERROR,
            data: serde_json::json!({ "kind": err.kind(), "message": err.to_string() }),
        }
    }
}

pub const COMMAND_MESSAGE_SEND: &str = "message.send";
pub const COMMAND_MESSAGE_READ: &str = "message.read";
pub const COMMAND_MESSAGE_DELIVERED: &str = "message.delivered";
pub const COMMAND_MESSAGE_DELETE: &str = "message.delete";
pub const COMMAND_CONVERSATION_JOIN: &str = "conversation.join";
pub const COMMAND_CONVERSATION_LEAVE: &str = "conversation.leave";
pub const COMMAND_TYPING_START: &str = "typing.start";
pub const COMMAND_TYPING_STOP: &str = "typing.stop";
pub const COMMAND_PRESENCE_PING: &str = "presence.ping";

pub const EVENT_READY: &str = "ready";
pub const EVENT_MESSAGE_UNIFIED: &str = "message:unified";
pub const EVENT_STATUS_UNIFIED: &str = "status:unified";
pub const EVENT_MESSAGE_DELETED: &str = "message:deleted";
pub const EVENT_PRESENCE_JOINED: &str = "presence:joined";
pub const EVENT_PRESENCE_LEFT: &str = "presence:left";
pub const EVENT_USER_STATUS: &str = "user:status";
pub const EVENT_TYPING_START: &str = "typing:start";
pub const EVENT_TYPING_STOP: &str = "typing:stop";
pub const EVENT_ERROR: &str = "error";

#[derive(Debug, Deserialize)]
pub struct MessageSendCommand {
    pub conversation_id: i64,
    #[serde(flatten)]
    pub payload: SendMessageDto,
}

/// Accepts either shape the spec allows for `message.read`/`message.delivered`:
/// a single `message_id` or a `message_ids` array. `resolve()` merges both
/// into one list since a client may send either.
#[derive(Debug, Default, Deserialize)]
pub struct MessageIdsCommand {
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub message_ids: Option<Vec<i64>>,
}

impl MessageIdsCommand {
    pub fn resolve(self) -> Vec<i64> {
        let mut ids = self.message_ids.unwrap_or_default();
        if let Some(id) = self.message_id {
            ids.push(id);
        }
        ids
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageDeleteCommand {
    pub message_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ConversationRoomCommand {
    pub conversation_id: i64,
}

/// Shared by `typing.start` and `typing.stop` — both just name a room.
pub type TypingCommand = ConversationRoomCommand;
