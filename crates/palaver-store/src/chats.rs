//! Conversations, membership and unread counters.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use palaver_shared::{ChatId, ChatKind, MemberRole, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::MemberState;

impl Database {
    // ------------------------------------------------------------------
    // Chats
    // ------------------------------------------------------------------

    /// Insert a new conversation and return its id.
    pub fn create_chat(&self, kind: ChatKind, title: &str) -> Result<ChatId> {
        self.conn().execute(
            "INSERT INTO chats (kind, title, created_at) VALUES (?1, ?2, ?3)",
            params![kind.as_str(), title, Utc::now().to_rfc3339()],
        )?;
        Ok(ChatId(self.conn().last_insert_rowid()))
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Add a member (or update their role if already present).
    pub fn upsert_member(&self, chat: ChatId, user: UserId, role: MemberRole) -> Result<()> {
        self.conn().execute(
            "INSERT INTO chat_members (chat_id, user_id, role, muted_until, banned, joined_at)
             VALUES (?1, ?2, ?3, NULL, 0, ?4)
             ON CONFLICT (chat_id, user_id) DO UPDATE SET role = excluded.role",
            params![chat.0, user.0, role.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Membership state for one (chat, user) pair, `None` when not a member.
    pub fn member_state(&self, chat: ChatId, user: UserId) -> Result<Option<MemberState>> {
        let row = self
            .conn()
            .query_row(
                "SELECT role, muted_until, banned
                 FROM chat_members
                 WHERE chat_id = ?1 AND user_id = ?2",
                params![chat.0, user.0],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((role, muted_until, banned)) = row else {
            return Ok(None);
        };

        let role = MemberRole::parse(&role)
            .ok_or_else(|| StoreError::Migration(format!("unknown member role '{role}'")))?;
        let muted_until = muted_until
            .map(|s| {
                s.parse::<DateTime<Utc>>()
                    .map_err(|_| StoreError::Migration("unparsable muted_until".into()))
            })
            .transpose()?;

        Ok(Some(MemberState {
            role,
            muted_until,
            banned: banned != 0,
        }))
    }

    /// Mute a member until the given instant (`None` lifts the mute).
    pub fn set_muted_until(
        &self,
        chat: ChatId,
        user: UserId,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE chat_members SET muted_until = ?1 WHERE chat_id = ?2 AND user_id = ?3",
            params![until.map(|t| t.to_rfc3339()), chat.0, user.0],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Ban or unban a member.
    pub fn set_banned(&self, chat: ChatId, user: UserId, banned: bool) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE chat_members SET banned = ?1 WHERE chat_id = ?2 AND user_id = ?3",
            params![banned as i64, chat.0, user.0],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Unread counters
    // ------------------------------------------------------------------

    /// Reset a member's unread counter to zero.
    pub fn reset_unread(&self, chat: ChatId, user: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT INTO chat_unreads (chat_id, user_id, unread_count, updated_at)
             VALUES (?1, ?2, 0, ?3)
             ON CONFLICT (chat_id, user_id)
             DO UPDATE SET unread_count = 0, updated_at = excluded.updated_at",
            params![chat.0, user.0, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Bump the unread counter of every non-banned member except the sender.
    pub fn bump_unread(&self, chat: ChatId, sender: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT INTO chat_unreads (chat_id, user_id, unread_count, updated_at)
             SELECT cm.chat_id, cm.user_id, 1, ?3
             FROM chat_members cm
             WHERE cm.chat_id = ?1 AND cm.user_id <> ?2 AND cm.banned = 0
             ON CONFLICT (chat_id, user_id)
             DO UPDATE SET unread_count = unread_count + 1, updated_at = excluded.updated_at",
            params![chat.0, sender.0, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Current unread count for one member.
    pub fn unread_count(&self, chat: ChatId, user: UserId) -> Result<i64> {
        let count = self
            .conn()
            .query_row(
                "SELECT unread_count FROM chat_unreads WHERE chat_id = ?1 AND user_id = ?2",
                params![chat.0, user.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }
}
