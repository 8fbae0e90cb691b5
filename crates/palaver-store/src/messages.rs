//! CRUD operations for message metadata rows.
//!
//! These rows are the derived index over the segment files: flag mutation
//! and moderation queries run here, while the physical content lives in the
//! append-only segments.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use palaver_shared::{ChatId, MessageKind, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{MessageFlag, MessageRecord};

impl Database {
    /// Insert the metadata row for a freshly committed message.
    pub fn insert_message(&self, message: &MessageRecord) -> Result<()> {
        let mentions = serde_json::to_string(&message.mentions)?;
        self.conn().execute(
            "INSERT INTO messages
                 (id, chat_id, sender_id, kind, content, reply_to, mentions,
                  recalled, deleted, pinned, featured, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                message.id.to_string(),
                message.chat_id.0,
                message.sender_id.0,
                message.kind.as_str(),
                message.content,
                message.reply_to.map(|id| id.to_string()),
                mentions,
                message.recalled as i64,
                message.deleted as i64,
                message.pinned as i64,
                message.featured as i64,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single message by id.
    pub fn message_by_id(&self, id: Uuid) -> Result<MessageRecord> {
        self.conn()
            .query_row(
                "SELECT id, chat_id, sender_id, kind, content, reply_to, mentions,
                        recalled, deleted, pinned, featured, created_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Recent history for a conversation, newest first, excluding deleted
    /// messages.  Recalled messages are returned with their flag set so the
    /// renderer can apply the overlay.
    pub fn messages_for_chat(
        &self,
        chat: ChatId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageRecord>> {
        let cutoff = before.unwrap_or_else(Utc::now).to_rfc3339();
        let mut stmt = self.conn().prepare(
            "SELECT id, chat_id, sender_id, kind, content, reply_to, mentions,
                    recalled, deleted, pinned, featured, created_at
             FROM messages
             WHERE chat_id = ?1 AND created_at < ?2 AND deleted = 0
             ORDER BY created_at DESC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![chat.0, cutoff, limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Flip one of the four mutable flags.  Never touches any other column.
    pub fn set_message_flag(&self, id: Uuid, flag: MessageFlag, value: bool) -> Result<()> {
        let sql = format!("UPDATE messages SET {} = ?1 WHERE id = ?2", flag.column());
        let affected = self
            .conn()
            .execute(&sql, params![value as i64, id.to_string()])?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let id_str: String = row.get(0)?;
    let kind_str: String = row.get(3)?;
    let reply_to: Option<String> = row.get(5)?;
    let mentions_json: String = row.get(6)?;
    let ts_str: String = row.get(11)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let kind = MessageKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown message kind '{kind_str}'").into(),
        )
    })?;
    let reply_to = reply_to
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let mentions: Vec<UserId> = serde_json::from_str(&mentions_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let created_at: DateTime<Utc> = ts_str.parse().map_err(|e: chrono::ParseError| {
        rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(MessageRecord {
        id,
        chat_id: ChatId(row.get(1)?),
        sender_id: UserId(row.get(2)?),
        kind,
        content: row.get(4)?,
        reply_to,
        mentions,
        recalled: row.get::<_, i64>(7)? != 0,
        deleted: row.get::<_, i64>(8)? != 0,
        pinned: row.get::<_, i64>(9)? != 0,
        featured: row.get::<_, i64>(10)? != 0,
        created_at,
    })
}
