//! v001 -- Initial schema creation.
//!
//! Creates the six core tables: `users`, `user_tokens`, `chats`,
//! `chat_members`, `messages`, and `chat_unreads`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    nickname   TEXT NOT NULL,
    status     INTEGER NOT NULL DEFAULT 1,    -- 1 = active, 2 = suspended
    is_admin   INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    created_at TEXT NOT NULL                  -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Bearer tokens (identity provider backing table)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS user_tokens (
    token      TEXT PRIMARY KEY NOT NULL,     -- 64 hex chars
    user_id    INTEGER NOT NULL,
    expires_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_user_tokens_user ON user_tokens(user_id);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    kind       TEXT NOT NULL,                 -- 'group' | 'private'
    title      TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Conversation membership (mute / ban state lives here)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_members (
    chat_id     INTEGER NOT NULL,
    user_id     INTEGER NOT NULL,
    role        TEXT NOT NULL DEFAULT 'member',
    muted_until TEXT,                         -- nullable ISO-8601
    banned      INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    joined_at   TEXT NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Message metadata (derived index over the segment files)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    chat_id    INTEGER NOT NULL,
    sender_id  INTEGER NOT NULL,
    kind       TEXT NOT NULL,                 -- 'text' | 'image'
    content    TEXT NOT NULL,
    reply_to   TEXT,                          -- nullable UUID
    mentions   TEXT NOT NULL DEFAULT '[]',    -- JSON array of user ids
    recalled   INTEGER NOT NULL DEFAULT 0,    -- flag overlays; the segment
    deleted    INTEGER NOT NULL DEFAULT 0,    -- line is never rewritten
    pinned     INTEGER NOT NULL DEFAULT 0,
    featured   INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, created_at DESC);

-- ----------------------------------------------------------------
-- Per-member unread counters
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_unreads (
    chat_id      INTEGER NOT NULL,
    user_id      INTEGER NOT NULL,
    unread_count INTEGER NOT NULL DEFAULT 0,
    updated_at   TEXT NOT NULL,

    PRIMARY KEY (chat_id, user_id)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
