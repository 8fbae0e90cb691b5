//! The durable, append-only event log.
//!
//! One JSON object per line.  Any process may append (the relay itself, the
//! HTTP request tier, moderation tooling); every relay worker tails the file
//! with a byte-offset cursor and fans new records out to its subscribers.
//!
//! Guarantees: appends write one complete line in a single `O_APPEND` write,
//! so a reader never observes a half-record as committed -- a trailing line
//! without `\n` is simply not consumed yet.  Records are never reordered or
//! mutated; readers only move forward, and readers never block the writer.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use palaver_shared::EventRecord;

use crate::error::Result;

pub struct EventLog {
    path: PathBuf,
    /// Serializes appends from this process; cross-process ordering comes
    /// from `O_APPEND` itself.
    append_lock: Mutex<()>,
}

impl EventLog {
    /// Open (or create) the log file, creating parent directories as needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            append_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record; returns the byte offset at which it begins.
    pub fn append(&self, record: &EventRecord) -> Result<u64> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.append_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        let offset = file.metadata()?.len();
        file.write_all(line.as_bytes())?;
        Ok(offset)
    }

    /// Current end-of-log position.  Tailers start here on boot: history is
    /// intentionally not replayed after a restart.
    pub fn end_offset(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Read every complete record between `offset` and end-of-log.
    ///
    /// Returns the parsed records and the new cursor.  A trailing partial
    /// line is left for the next poll; malformed lines are skipped with a
    /// warning.  If `offset` lies beyond the current file size (the log was
    /// rotated or truncated externally) the cursor resets to zero.
    pub fn read_from(&self, offset: u64) -> Result<(Vec<EventRecord>, u64)> {
        let file = std::fs::File::open(&self.path)?;
        let len = file.metadata()?.len();

        let mut cursor = offset;
        if cursor > len {
            tracing::warn!(
                offset = cursor,
                size = len,
                "event log shrank under the cursor, resetting to start"
            );
            cursor = 0;
        }
        if cursor == len {
            return Ok((Vec::new(), cursor));
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(cursor))?;

        let mut records = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let bytes = reader.read_line(&mut line)?;
            if bytes == 0 {
                break;
            }
            if !line.ends_with('\n') {
                // Half-written record; the producer's write has not landed
                // in full yet.  Pick it up on the next poll.
                break;
            }
            cursor += bytes as u64;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<EventRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed event log line");
                }
            }
        }

        Ok((records, cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_shared::{ChatId, EventKind};

    fn record(n: i64) -> EventRecord {
        EventRecord::new(
            EventKind::NewMessage,
            Some(ChatId(n)),
            serde_json::json!({ "n": n }),
            None,
        )
    }

    #[test]
    fn append_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path().join("events.ndjson")).unwrap();

        let first = log.append(&record(1)).unwrap();
        let second = log.append(&record(2)).unwrap();
        assert_eq!(first, 0);
        assert!(second > first);

        let (records, cursor) = log.read_from(0).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].chat_id, Some(ChatId(1)));
        assert_eq!(records[1].chat_id, Some(ChatId(2)));
        assert_eq!(cursor, log.end_offset().unwrap());
    }

    #[test]
    fn tailing_twice_from_same_cursor_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path().join("events.ndjson")).unwrap();
        log.append(&record(1)).unwrap();
        log.append(&record(2)).unwrap();

        let (a, cursor_a) = log.read_from(0).unwrap();
        let (b, cursor_b) = log.read_from(0).unwrap();
        assert_eq!(a, b);
        assert_eq!(cursor_a, cursor_b);
    }

    #[test]
    fn tailing_from_end_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path().join("events.ndjson")).unwrap();
        log.append(&record(1)).unwrap();

        let end = log.end_offset().unwrap();
        let (records, cursor) = log.read_from(end).unwrap();
        assert!(records.is_empty());
        assert_eq!(cursor, end);
    }

    #[test]
    fn partial_trailing_line_is_not_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let log = EventLog::open(&path).unwrap();
        log.append(&record(1)).unwrap();
        let committed = log.end_offset().unwrap();

        // Simulate a producer mid-write: valid JSON prefix, no newline.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"kind\":\"new_mes").unwrap();

        let (records, cursor) = log.read_from(0).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(cursor, committed);
    }

    #[test]
    fn cursor_beyond_size_resets_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let log = EventLog::open(&path).unwrap();
        log.append(&record(1)).unwrap();
        let old_end = log.end_offset().unwrap();

        // External rotation: file replaced by a shorter one.
        std::fs::write(&path, b"").unwrap();
        log.append(&record(2)).unwrap();

        let (records, _) = log.read_from(old_end + 100).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].chat_id, Some(ChatId(2)));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let log = EventLog::open(&path).unwrap();
        log.append(&record(1)).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"not json at all\n").unwrap();
        log.append(&record(2)).unwrap();

        let (records, cursor) = log.read_from(0).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(cursor, log.end_offset().unwrap());
    }
}
