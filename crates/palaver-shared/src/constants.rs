//! Shared timing and sizing defaults.
//!
//! These are the defaults baked into [`crate::types`] consumers; the relay's
//! env config can override every one of them.

/// Seconds a fresh connection has to present an `authenticate` frame before
/// it is forcibly closed.
pub const AUTH_GRACE_SECS: u64 = 30;

/// Seconds after creation during which a message may still be recalled.
pub const RECALL_WINDOW_SECS: i64 = 120;

/// Milliseconds between event-log tail polls.
pub const TAIL_INTERVAL_MS: u64 = 1_000;

/// Seconds between presence broadcasts / snapshot writes.
pub const PRESENCE_INTERVAL_SECS: u64 = 5;

/// Bytes after which the active message segment rolls over to a new part.
pub const SEGMENT_MAX_BYTES: u64 = 4 * 1024 * 1024;

/// Days a closed segment stays live before compaction archives it.
pub const SEGMENT_RETENTION_DAYS: i64 = 30;

/// Days an archive artifact is kept before deletion.
pub const ARCHIVE_RETENTION_DAYS: i64 = 90;

/// Seconds between compaction runs.
pub const COMPACT_INTERVAL_SECS: u64 = 3_600;
