//! Durable event log records.
//!
//! One [`EventRecord`] is appended per committed message or moderation
//! action.  Records are immutable once written: the log is the decoupling
//! point between processes, so every relay worker tails it and fans records
//! out to its own subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ChatId, UserId};

/// What an event record describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewMessage,
    Recall,
    Delete,
    ReadReceipt,
    /// Online-count update from another worker or an external producer.
    Presence,
}

/// A single append-only log entry.
///
/// `chat_id == None` means the event is untargeted and broadcast to every
/// live connection.  `origin` names the worker that already fanned the
/// record out synchronously at commit time; a tailer with the same worker id
/// skips it to avoid duplicate delivery.  External producers leave it unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl EventRecord {
    pub fn new(
        kind: EventKind,
        chat_id: Option<ChatId>,
        payload: serde_json::Value,
        origin: Option<String>,
    ) -> Self {
        Self {
            chat_id,
            kind,
            payload,
            created_at: Utc::now(),
            origin,
        }
    }

    /// Record for a freshly committed message; the payload carries the full
    /// message body so subscribers can render it without a store round-trip.
    pub fn new_message(
        chat_id: ChatId,
        message: serde_json::Value,
        origin: Option<String>,
    ) -> Self {
        Self::new(EventKind::NewMessage, Some(chat_id), message, origin)
    }

    pub fn recall(chat_id: ChatId, message_id: Uuid, origin: Option<String>) -> Self {
        Self::new(
            EventKind::Recall,
            Some(chat_id),
            serde_json::json!({ "message_id": message_id }),
            origin,
        )
    }

    pub fn delete(chat_id: ChatId, message_id: Uuid, origin: Option<String>) -> Self {
        Self::new(
            EventKind::Delete,
            Some(chat_id),
            serde_json::json!({ "message_id": message_id }),
            origin,
        )
    }

    pub fn read_receipt(chat_id: ChatId, user_id: UserId, origin: Option<String>) -> Self {
        Self::new(
            EventKind::ReadReceipt,
            Some(chat_id),
            serde_json::json!({ "user_id": user_id }),
            origin,
        )
    }
}
