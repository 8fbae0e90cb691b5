//! # palaver-store
//!
//! Durable state for the messaging relay: the SQLite metadata store (users,
//! tokens, conversations, membership, message flags), the per-conversation
//! rotating segment files that are the content of record, the append-only
//! event log that decouples producers from relay workers, and archival
//! compaction of closed segments.
//!
//! The segment files are the source of truth for message content; the SQLite
//! rows are a derived, rebuildable projection used for flag mutation and
//! moderation queries.  The whole crate is synchronous -- async callers are
//! expected to offload through `spawn_blocking`.

pub mod archive;
pub mod chats;
pub mod database;
pub mod event_log;
pub mod identity;
pub mod message_store;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod segments;

mod error;

pub use archive::ArchiveStore;
pub use database::Database;
pub use error::{Result, StoreError};
pub use event_log::EventLog;
pub use message_store::MessageStore;
pub use models::*;
pub use segments::SegmentStore;
