//! Per-conversation rotating segment files.
//!
//! Layout: `<base>/<chat_id>/<YYYYMMDD>-<part>.log`, one JSON object per
//! line.  Appends always go to the highest part of the current day; once the
//! active file reaches the size threshold the next append rolls over to a
//! new part.  Only the committing path ever writes a segment, and only the
//! active segment is ever written -- everything else is closed and immutable
//! (and fair game for the archival compactor).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};

use palaver_shared::ChatId;

use crate::error::Result;

/// Parsed `<YYYYMMDD>-<part>.log` file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentName {
    pub date: NaiveDate,
    pub part: u32,
}

impl SegmentName {
    pub fn file_name(&self) -> String {
        format!("{}-{:03}.log", self.date.format("%Y%m%d"), self.part)
    }

    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".log")?;
        let (date, part) = stem.split_once('-')?;
        let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
        let part = part.parse().ok()?;
        Some(Self { date, part })
    }
}

pub struct SegmentStore {
    base_dir: PathBuf,
    max_segment_bytes: u64,
}

impl SegmentStore {
    /// Open (or create) the segment tree rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>, max_segment_bytes: u64) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;

        tracing::info!(path = %base_dir.display(), "segment store initialized");

        Ok(Self {
            base_dir,
            max_segment_bytes,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn max_segment_bytes(&self) -> u64 {
        self.max_segment_bytes
    }

    pub fn chat_dir(&self, chat: ChatId) -> PathBuf {
        self.base_dir.join(chat.0.to_string())
    }

    /// Append one message line to the conversation's active segment and
    /// return the path written to.
    pub fn append(&self, chat: ChatId, payload: &serde_json::Value) -> Result<PathBuf> {
        self.append_on(chat, Utc::now().date_naive(), payload)
    }

    fn append_on(&self, chat: ChatId, date: NaiveDate, payload: &serde_json::Value) -> Result<PathBuf> {
        let dir = self.chat_dir(chat);
        std::fs::create_dir_all(&dir)?;

        let mut name = SegmentName {
            date,
            part: self.active_part(chat, date)?,
        };
        let mut path = dir.join(name.file_name());
        if let Ok(meta) = std::fs::metadata(&path) {
            if meta.len() >= self.max_segment_bytes {
                name.part += 1;
                path = dir.join(name.file_name());
                tracing::debug!(chat = %chat, segment = %path.display(), "segment rotated");
            }
        }

        let mut line = serde_json::to_string(payload)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        Ok(path)
    }

    /// Highest part number present for a (chat, day), 0 when none exists.
    pub fn active_part(&self, chat: ChatId, date: NaiveDate) -> Result<u32> {
        let dir = self.chat_dir(chat);
        if !dir.is_dir() {
            return Ok(0);
        }

        let mut max_part = 0;
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(name) = entry
                .file_name()
                .to_str()
                .and_then(SegmentName::parse)
            {
                if name.date == date && name.part > max_part {
                    max_part = name.part;
                }
            }
        }
        Ok(max_part)
    }

    /// All conversations with at least one segment on disk.
    pub fn list_chats(&self) -> Result<Vec<ChatId>> {
        let mut chats = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                chats.push(ChatId(id));
            }
        }
        chats.sort();
        Ok(chats)
    }

    /// All segments of one conversation, oldest first.
    pub fn list_segments(&self, chat: ChatId) -> Result<Vec<(PathBuf, SegmentName)>> {
        let dir = self.chat_dir(chat);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut segments = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(name) = entry
                .file_name()
                .to_str()
                .and_then(SegmentName::parse)
            {
                segments.push((entry.path(), name));
            }
        }
        segments.sort_by_key(|(_, name)| (name.date, name.part));
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_name_round_trip() {
        let name = SegmentName {
            date: NaiveDate::from_ymd_opt(2026, 8, 30).unwrap(),
            part: 7,
        };
        assert_eq!(name.file_name(), "20260830-007.log");
        assert_eq!(SegmentName::parse(&name.file_name()), Some(name));
        assert_eq!(SegmentName::parse("garbage.txt"), None);
    }

    #[test]
    fn append_writes_one_json_line_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::new(dir.path(), 1024 * 1024).unwrap();
        let chat = ChatId(7);

        store.append(chat, &serde_json::json!({ "n": 1 })).unwrap();
        let path = store.append(chat, &serde_json::json!({ "n": 2 })).unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["n"], 2);
    }

    #[test]
    fn rollover_on_size_threshold() {
        let dir = tempfile::tempdir().unwrap();
        // Threshold small enough that the second append rolls over.
        let store = SegmentStore::new(dir.path(), 8).unwrap();
        let chat = ChatId(1);
        let today = Utc::now().date_naive();

        let first = store.append(chat, &serde_json::json!({ "n": 1 })).unwrap();
        let second = store.append(chat, &serde_json::json!({ "n": 2 })).unwrap();

        assert_ne!(first, second);
        assert_eq!(store.active_part(chat, today).unwrap(), 1);

        // The rotated segment keeps its content.
        let content = std::fs::read_to_string(first).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn list_chats_and_segments() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::new(dir.path(), 1024).unwrap();

        store.append(ChatId(2), &serde_json::json!({})).unwrap();
        store.append(ChatId(5), &serde_json::json!({})).unwrap();

        assert_eq!(store.list_chats().unwrap(), vec![ChatId(2), ChatId(5)]);
        assert_eq!(store.list_segments(ChatId(2)).unwrap().len(), 1);
        assert!(store.list_segments(ChatId(99)).unwrap().is_empty());
    }
}
