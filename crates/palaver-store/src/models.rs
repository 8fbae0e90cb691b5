//! Domain model structs persisted in the metadata store.
//!
//! Every struct derives `Serialize` so it can be written straight into a
//! segment line or an event payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use palaver_shared::{ChatId, ChatKind, MemberRole, MessageKind, UserId};

// ---------------------------------------------------------------------------
// User / identity
// ---------------------------------------------------------------------------

/// A registered user.  Status 1 = active, 2 = suspended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRow {
    pub id: UserId,
    pub nickname: String,
    pub status: i64,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

pub const USER_STATUS_ACTIVE: i64 = 1;
pub const USER_STATUS_SUSPENDED: i64 = 2;

/// Outcome of validating a bearer credential: who it belongs to and whether
/// that identity may currently connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenIdentity {
    pub user_id: UserId,
    pub active: bool,
    pub moderator: bool,
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

/// A conversation row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRow {
    pub id: ChatId,
    pub kind: ChatKind,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// Per-conversation member state, consulted at submission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberState {
    pub role: MemberRole,
    pub muted_until: Option<DateTime<Utc>>,
    pub banned: bool,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A message submission before it has been committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: String,
    pub reply_to: Option<Uuid>,
    pub mentions: Vec<UserId>,
}

/// A committed message: segment line content plus the mutable flag overlay.
///
/// The flags are the only fields ever mutated after creation, and only in
/// the metadata row -- the physical segment line is immutable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: Uuid,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: String,
    pub reply_to: Option<Uuid>,
    pub mentions: Vec<UserId>,
    pub recalled: bool,
    pub deleted: bool,
    pub pinned: bool,
    pub featured: bool,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// JSON body written to the segment file and carried in `new_message`
    /// event payloads.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// The four mutable message flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFlag {
    Recalled,
    Deleted,
    Pinned,
    Featured,
}

impl MessageFlag {
    pub fn column(&self) -> &'static str {
        match self {
            MessageFlag::Recalled => "recalled",
            MessageFlag::Deleted => "deleted",
            MessageFlag::Pinned => "pinned",
            MessageFlag::Featured => "featured",
        }
    }
}
