//! The composite message store: segment files + metadata rows + event log.
//!
//! `commit` is the single write path for new messages and performs, in
//! order: segment append (content of record), metadata insert (derived
//! index), event-log append (fan-out trigger).  If the segment append
//! succeeds and a later step fails the submission is reported as failed but
//! the content stays recoverable from the segment -- "logged but not yet
//! indexed", a repair-pass concern rather than data loss.
//!
//! Recall and delete are flag overlays: they mutate the metadata row and
//! emit an event, and never rewrite physical content.

use chrono::{Duration, Utc};
use uuid::Uuid;

use palaver_shared::{ChatId, EventRecord, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::event_log::EventLog;
use crate::models::{MessageFlag, MessageRecord, NewMessage};
use crate::segments::SegmentStore;

pub struct MessageStore {
    db: Database,
    segments: SegmentStore,
    log: EventLog,
    recall_window: Duration,
    /// Worker id stamped into produced event records so this worker's tailer
    /// can skip records it already fanned out synchronously.
    origin: Option<String>,
}

impl MessageStore {
    pub fn new(
        db: Database,
        segments: SegmentStore,
        log: EventLog,
        recall_window_secs: i64,
        origin: Option<String>,
    ) -> Self {
        Self {
            db,
            segments,
            log,
            recall_window: Duration::seconds(recall_window_secs),
            origin,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn segments(&self) -> &SegmentStore {
        &self.segments
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Full submission path: membership / ban / mute enforcement, then
    /// commit.  Nothing is mutated when the sender is rejected.
    pub fn submit(&self, new: NewMessage) -> Result<(MessageRecord, EventRecord)> {
        let member = self
            .db
            .member_state(new.chat_id, new.sender_id)?
            .ok_or(StoreError::NotAMember)?;
        if member.banned {
            return Err(StoreError::Banned);
        }
        if let Some(until) = member.muted_until {
            if until > Utc::now() {
                return Err(StoreError::Muted { until });
            }
        }

        let committed = self.commit(new)?;

        // Unread counters are derived state; a failure here must not undo an
        // already-committed message.
        if let Err(e) = self
            .db
            .bump_unread(committed.0.chat_id, committed.0.sender_id)
        {
            tracing::warn!(error = %e, message = %committed.0.id, "unread bump failed");
        }

        Ok(committed)
    }

    /// Commit an accepted message: segment append, metadata row, event
    /// record.  Returns the stored message and the event it produced.
    pub fn commit(&self, new: NewMessage) -> Result<(MessageRecord, EventRecord)> {
        let record = MessageRecord {
            id: Uuid::new_v4(),
            chat_id: new.chat_id,
            sender_id: new.sender_id,
            kind: new.kind,
            content: new.content,
            reply_to: new.reply_to,
            mentions: new.mentions,
            recalled: false,
            deleted: false,
            pinned: false,
            featured: false,
            created_at: Utc::now(),
        };
        self.commit_record(record)
    }

    /// Commit a pre-built record.  Exposed for repair tooling that re-indexes
    /// segment lines which never made it into the metadata store.
    pub fn commit_record(&self, record: MessageRecord) -> Result<(MessageRecord, EventRecord)> {
        let payload = record.to_payload();

        self.segments.append(record.chat_id, &payload)?;
        self.db.insert_message(&record)?;

        let event = EventRecord::new_message(record.chat_id, payload, self.origin.clone());
        self.log.append(&event)?;

        tracing::debug!(message = %record.id, chat = %record.chat_id, "message committed");
        Ok((record, event))
    }

    // ------------------------------------------------------------------
    // Moderation overlays
    // ------------------------------------------------------------------

    /// Recall a message.  Allowed for the original sender or a moderator,
    /// and only while the recall window is open.  On rejection the flags are
    /// untouched and no event is produced.
    pub fn recall(
        &self,
        message_id: Uuid,
        requester: UserId,
        is_moderator: bool,
    ) -> Result<EventRecord> {
        let message = self.db.message_by_id(message_id)?;
        if message.sender_id != requester && !is_moderator {
            return Err(StoreError::NotMessageSender);
        }
        if Utc::now() - message.created_at > self.recall_window {
            return Err(StoreError::RecallWindowElapsed);
        }

        self.db
            .set_message_flag(message_id, MessageFlag::Recalled, true)?;

        let event = EventRecord::recall(message.chat_id, message_id, self.origin.clone());
        self.log.append(&event)?;

        tracing::info!(message = %message_id, requester = %requester, "message recalled");
        Ok(event)
    }

    /// Delete a message (sender or moderator; no time window).
    pub fn delete(
        &self,
        message_id: Uuid,
        requester: UserId,
        is_moderator: bool,
    ) -> Result<EventRecord> {
        let message = self.db.message_by_id(message_id)?;
        if message.sender_id != requester && !is_moderator {
            return Err(StoreError::NotMessageSender);
        }

        self.db
            .set_message_flag(message_id, MessageFlag::Deleted, true)?;

        let event = EventRecord::delete(message.chat_id, message_id, self.origin.clone());
        self.log.append(&event)?;

        tracing::info!(message = %message_id, requester = %requester, "message deleted");
        Ok(event)
    }

    /// Pin/unpin -- metadata only, no live event required.
    pub fn set_pinned(&self, message_id: Uuid, pinned: bool) -> Result<()> {
        self.db
            .set_message_flag(message_id, MessageFlag::Pinned, pinned)
    }

    /// Feature/unfeature -- metadata only.
    pub fn set_featured(&self, message_id: Uuid, featured: bool) -> Result<()> {
        self.db
            .set_message_flag(message_id, MessageFlag::Featured, featured)
    }

    // ------------------------------------------------------------------
    // Read receipts
    // ------------------------------------------------------------------

    /// Mark a conversation read for one member and emit a read receipt.
    pub fn mark_read(&self, chat: ChatId, user: UserId) -> Result<EventRecord> {
        if self.db.member_state(chat, user)?.is_none() {
            return Err(StoreError::NotAMember);
        }

        self.db.reset_unread(chat, user)?;

        let event = EventRecord::read_receipt(chat, user, self.origin.clone());
        self.log.append(&event)?;
        Ok(event)
    }
}
