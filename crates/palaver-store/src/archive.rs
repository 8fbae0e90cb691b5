//! Archival compaction of closed message segments.
//!
//! Closed segments (any day before today, or same-day parts below the active
//! part) are gzip-compressed into immutable artifacts and the live file is
//! removed.  The active segment is never selected, so the compactor can
//! never race an in-flight append.  Artifacts past the long-term retention
//! window are deleted outright.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::Result;
use crate::segments::{SegmentName, SegmentStore};

pub struct ArchiveStore {
    archive_dir: PathBuf,
}

impl ArchiveStore {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Result<Self> {
        let archive_dir = archive_dir.into();
        std::fs::create_dir_all(&archive_dir)?;
        Ok(Self { archive_dir })
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Compress and remove every closed segment that is either older than
    /// `retention_days` or already past the store's size threshold.
    /// Returns the artifact paths created.
    pub fn compact(
        &self,
        segments: &SegmentStore,
        retention_days: i64,
        today: NaiveDate,
    ) -> Result<Vec<PathBuf>> {
        let mut archived = Vec::new();

        for chat in segments.list_chats()? {
            let active_part = segments.active_part(chat, today)?;

            for (path, name) in segments.list_segments(chat)? {
                let closed =
                    name.date < today || (name.date == today && name.part < active_part);
                if !closed {
                    continue;
                }

                let age_days = (today - name.date).num_days();
                let size = std::fs::metadata(&path)?.len();
                if age_days <= retention_days && size < segments.max_segment_bytes() {
                    continue;
                }

                let artifact = self.compress(chat.0, &path, &name)?;
                std::fs::remove_file(&path)?;
                tracing::info!(
                    chat = %chat,
                    segment = %path.display(),
                    artifact = %artifact.display(),
                    "segment archived"
                );
                archived.push(artifact);
            }
        }

        Ok(archived)
    }

    /// Delete artifacts whose segment date is older than `retention_days`.
    pub fn prune(&self, retention_days: i64, today: NaiveDate) -> Result<usize> {
        let mut removed = 0;

        for chat_entry in std::fs::read_dir(&self.archive_dir)? {
            let chat_dir = chat_entry?.path();
            if !chat_dir.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&chat_dir)? {
                let path = entry?.path();
                let Some(name) = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_suffix(".gz"))
                    .and_then(SegmentName::parse)
                else {
                    continue;
                };

                if (today - name.date).num_days() > retention_days {
                    std::fs::remove_file(&path)?;
                    tracing::info!(artifact = %path.display(), "archive pruned");
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }

    /// All artifacts currently on disk.
    pub fn artifacts(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for chat_entry in std::fs::read_dir(&self.archive_dir)? {
            let chat_dir = chat_entry?.path();
            if !chat_dir.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&chat_dir)? {
                paths.push(entry?.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn compress(&self, chat: i64, source: &Path, name: &SegmentName) -> Result<PathBuf> {
        let dir = self.archive_dir.join(chat.to_string());
        std::fs::create_dir_all(&dir)?;
        let target = dir.join(format!("{}.gz", name.file_name()));

        let mut input = File::open(source)?;
        let output = File::create(&target)?;
        let mut encoder = GzEncoder::new(output, Compression::best());
        std::io::copy(&mut input, &mut encoder)?;
        encoder.finish()?;

        Ok(target)
    }
}
