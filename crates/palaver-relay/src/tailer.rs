//! Tailing the durable event log for cross-process delivery.
//!
//! Every relay worker keeps one in-memory byte cursor into the shared log.
//! The cursor starts at end-of-log on boot, so a restarted worker never
//! redelivers history.  Records stamped with this worker's own origin id are
//! skipped: they were already fanned out synchronously at commit time.

use std::sync::Arc;

use palaver_store::EventLog;

use crate::error::Result;
use crate::fanout::FanoutRouter;

pub struct LogTailer {
    log: Arc<EventLog>,
    router: FanoutRouter,
    origin: String,
    cursor: u64,
}

impl LogTailer {
    /// Position a new tailer at the current end of the log.
    pub fn new(log: Arc<EventLog>, router: FanoutRouter, origin: String) -> Result<Self> {
        let cursor = log.end_offset()?;
        Ok(Self {
            log,
            router,
            origin,
            cursor,
        })
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// One poll: read everything committed since the cursor and fan out the
    /// records other producers wrote.  Returns the number delivered.
    pub async fn tick(&mut self) -> Result<usize> {
        let log = self.log.clone();
        let cursor = self.cursor;
        let (records, new_cursor) =
            tokio::task::spawn_blocking(move || log.read_from(cursor)).await??;
        self.cursor = new_cursor;

        let mut delivered = 0;
        for record in &records {
            if record.origin.as_deref() == Some(self.origin.as_str()) {
                continue;
            }
            delivered += self.router.deliver(record).await;
        }
        Ok(delivered)
    }

    /// Poll forever.  Read failures are logged and retried next tick.
    pub async fn run(mut self, interval_ms: u64) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                tracing::warn!(error = %e, cursor = self.cursor, "event log poll failed");
            }
        }
    }
}
