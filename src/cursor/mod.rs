//! Opaque pagination cursors (C7).
//!
//! Message pagination walks a single monotonic integer id. Conversation
//! pagination walks the composite `(updatedAt, id)` ordering, so its cursor
//! carries both fields.

use chrono::{DateTime, Utc};

use crate::error::{AppError, AppResult};

/// Encodes a message id as a decimal string. "before" means "older than
/// this id" when the cursor is fed back into `fetchMessagesBefore`.
pub fn encode_message_cursor(id: i64) -> String {
    id.to_string()
}

pub fn decode_message_cursor(cursor: &str) -> AppResult<i64> {
    cursor
        .parse::<i64>()
        .map_err(|_| AppError::Validation("invalid message cursor".into()))
}

/// Encodes `(updatedAt, id)` as `urlencode(updatedAtIso) + "_" + id`.
pub fn encode_conversation_cursor(updated_at: DateTime<Utc>, id: i64) -> String {
    let encoded_ts = urlencoding::encode(&updated_at.to_rfc3339()).into_owned();
    format!("{encoded_ts}_{id}")
}

/// Decodes a conversation cursor back into its `(updatedAt, id)` pair.
///
/// The timestamp component may itself contain `_` once percent-decoded (it
/// never will for RFC3339 output, but the split is anchored on the last
/// `_` regardless, since `id` is always a plain decimal integer with no
/// underscore of its own).
pub fn decode_conversation_cursor(cursor: &str) -> AppResult<(DateTime<Utc>, i64)> {
    let (encoded_ts, id_part) = cursor
        .rsplit_once('_')
        .ok_or_else(|| AppError::Validation("invalid conversation cursor".into()))?;

    let ts_str = urlencoding::decode(encoded_ts)
        .map_err(|_| AppError::Validation("invalid conversation cursor".into()))?;

    let updated_at = DateTime::parse_from_rfc3339(&ts_str)
        .map_err(|_| AppError::Validation("invalid conversation cursor".into()))?
        .with_timezone(&Utc);

    let id = id_part
        .parse::<i64>()
        .map_err(|_| AppError::Validation("invalid conversation cursor".into()))?;

    Ok((updated_at, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn message_cursor_round_trips() {
        let cursor = encode_message_cursor(4242);
        assert_eq!(cursor, "4242");
        assert_eq!(decode_message_cursor(&cursor).unwrap(), 4242);
    }

    #[test]
    fn message_cursor_rejects_garbage() {
        assert!(decode_message_cursor("not-a-number").is_err());
        assert!(decode_message_cursor("").is_err());
    }

    #[test]
    fn conversation_cursor_round_trips() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 5, 12, 30, 0).unwrap();
        let cursor = encode_conversation_cursor(ts, 77);
        let (decoded_ts, decoded_id) = decode_conversation_cursor(&cursor).unwrap();
        assert_eq!(decoded_ts, ts);
        assert_eq!(decoded_id, 77);
    }

    #[test]
    fn conversation_cursor_rejects_malformed_input() {
        assert!(decode_conversation_cursor("no-separator-here").is_err());
        assert!(decode_conversation_cursor("garbage_77").is_err());
        assert!(decode_conversation_cursor("").is_err());
    }

    #[test]
    fn conversation_cursor_is_url_safe() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let cursor = encode_conversation_cursor(ts, 1);
        assert!(!cursor.contains('+'));
        assert!(!cursor.chars().any(|c| c == ':'));
    }
}
