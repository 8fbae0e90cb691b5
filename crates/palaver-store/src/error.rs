use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (segment, event log or archive file access).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure for a segment or event-log line.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Submitter is not a member of the target conversation.
    #[error("Not a member of this conversation")]
    NotAMember,

    /// Submitter has been banned from the conversation.
    #[error("Banned from this conversation")]
    Banned,

    /// Submitter is muted in the conversation.
    #[error("Muted until {until}")]
    Muted { until: DateTime<Utc> },

    /// Recall/delete requested by someone who is neither the sender nor a
    /// moderator.
    #[error("Only the sender or a moderator may do this")]
    NotMessageSender,

    /// Recall requested after the edit window elapsed.
    #[error("The recall window has elapsed")]
    RecallWindowElapsed,
}

impl StoreError {
    /// True for rejections of a well-formed request by an authenticated user:
    /// the relay reports these verbatim and mutates nothing.
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            StoreError::NotAMember
                | StoreError::Banned
                | StoreError::Muted { .. }
                | StoreError::NotMessageSender
                | StoreError::RecallWindowElapsed
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
