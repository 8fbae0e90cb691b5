//! Async facade over the synchronous store.
//!
//! `rusqlite` connections are not `Sync`, so the whole [`MessageStore`] sits
//! behind one `std::sync::Mutex` and every call is offloaded through
//! `spawn_blocking`.  A slow query therefore parks a blocking-pool thread,
//! never the delivery loops.

use std::sync::{Arc, Mutex, MutexGuard};

use palaver_shared::{ChatId, EventRecord, UserId};
use palaver_store::{MemberState, MessageRecord, MessageStore, NewMessage};

use crate::error::Result;

#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<MessageStore>>,
}

impl SharedStore {
    pub fn new(store: MessageStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Run a closure against the store on the current thread.  Only for
    /// callers already on a blocking thread (or in tests).
    pub fn blocking<R>(&self, f: impl FnOnce(&MessageStore) -> R) -> R {
        f(&self.lock())
    }

    /// Full submission pipeline: membership/ban/mute gate, segment append,
    /// metadata row, event record.
    pub async fn submit(&self, new: NewMessage) -> Result<(MessageRecord, EventRecord)> {
        let inner = self.inner.clone();
        let result =
            tokio::task::spawn_blocking(move || lock(&inner).submit(new)).await?;
        Ok(result?)
    }

    pub async fn member_state(&self, chat: ChatId, user: UserId) -> Result<Option<MemberState>> {
        let inner = self.inner.clone();
        let result =
            tokio::task::spawn_blocking(move || lock(&inner).db().member_state(chat, user))
                .await?;
        Ok(result?)
    }

    fn lock(&self) -> MutexGuard<'_, MessageStore> {
        lock(&self.inner)
    }
}

fn lock(inner: &Mutex<MessageStore>) -> MutexGuard<'_, MessageStore> {
    // A poisoned lock means another thread panicked mid-call; the store
    // itself stays consistent (every mutation is a single SQLite statement
    // or an O_APPEND write), so keep serving.
    inner.lock().unwrap_or_else(|e| e.into_inner())
}
