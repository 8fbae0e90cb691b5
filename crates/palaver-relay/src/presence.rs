//! Presence tracking and the out-of-process snapshot file.
//!
//! The live set comes straight from the connection registry; this module
//! only serializes it.  The snapshot is advisory -- it can be recomputed at
//! any moment, so write failures are logged and never propagate.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::registry::ConnectionRegistry;

#[derive(Serialize)]
struct PresenceSnapshot {
    updated_at: chrono::DateTime<Utc>,
    online: Vec<palaver_shared::UserId>,
}

pub struct PresenceTracker {
    registry: Arc<ConnectionRegistry>,
    snapshot_path: PathBuf,
}

impl PresenceTracker {
    pub fn new(registry: Arc<ConnectionRegistry>, snapshot_path: PathBuf) -> Self {
        Self {
            registry,
            snapshot_path,
        }
    }

    pub async fn online_count(&self) -> usize {
        self.registry.online_count().await
    }

    /// Recompute the online set and persist the snapshot.  Called on every
    /// online/offline transition and from the periodic broadcast task.
    pub async fn refresh(&self) -> usize {
        let online = self.registry.online_users().await;
        let count = online.len();

        let snapshot = PresenceSnapshot {
            updated_at: Utc::now(),
            online,
        };
        if let Err(e) = self.write_snapshot(&snapshot) {
            tracing::warn!(
                path = %self.snapshot_path.display(),
                error = %e,
                "presence snapshot write failed"
            );
        }

        count
    }

    fn write_snapshot(&self, snapshot: &PresenceSnapshot) -> std::io::Result<()> {
        if let Some(parent) = self.snapshot_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write-then-rename so external readers never see a torn file.
        let tmp = self.snapshot_path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(snapshot)?)?;
        std::fs::rename(&tmp, &self.snapshot_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_shared::UserId;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn snapshot_lists_distinct_online_identities() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("online.json");
        let registry = Arc::new(ConnectionRegistry::new());
        let tracker = PresenceTracker::new(registry.clone(), path.clone());

        let (tx, _rx) = mpsc::unbounded_channel();
        let a1 = registry.register(tx.clone()).await;
        registry.bind(a1, UserId(1)).await;
        let a2 = registry.register(tx.clone()).await;
        registry.bind(a2, UserId(1)).await;
        let b = registry.register(tx).await;
        registry.bind(b, UserId(2)).await;

        assert_eq!(tracker.refresh().await, 2);

        let body: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(body["online"], serde_json::json!([1, 2]));
        assert!(body["updated_at"].is_string());
    }

    #[tokio::test]
    async fn refresh_follows_disconnects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("online.json");
        let registry = Arc::new(ConnectionRegistry::new());
        let tracker = PresenceTracker::new(registry.clone(), path.clone());

        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = registry.register(tx).await;
        registry.bind(conn, UserId(9)).await;
        assert_eq!(tracker.refresh().await, 1);

        registry.release(conn).await;
        assert_eq!(tracker.refresh().await, 0);

        let body: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(body["online"], serde_json::json!([]));
    }
}
