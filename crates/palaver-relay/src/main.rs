//! # palaver-relay
//!
//! Real-time messaging relay worker.
//!
//! This binary provides:
//! - **WebSocket fan-out** of committed messages and moderation events to
//!   subscribed connections
//! - **Authentication handshake** against the store's token table, with a
//!   bounded grace period for unauthenticated connections
//! - **Cross-process delivery** by tailing the shared append-only event log,
//!   so any number of workers and external producers stay consistent
//! - **Presence tracking** with a snapshot file readable by out-of-process
//!   stats tooling
//! - **Archival compaction** of closed message segments

mod auth;
mod config;
mod error;
mod fanout;
mod presence;
mod registry;
mod session;
mod store;
mod tailer;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use palaver_store::{ArchiveStore, Database, EventLog, MessageStore, SegmentStore};

use crate::auth::StoreIdentityProvider;
use crate::config::RelayConfig;
use crate::fanout::FanoutRouter;
use crate::presence::PresenceTracker;
use crate::registry::ConnectionRegistry;
use crate::session::SessionContext;
use crate::store::SharedStore;
use crate::tailer::LogTailer;
use crate::ws::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,palaver_relay=debug")),
        )
        .init();

    info!("Starting palaver relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = RelayConfig::from_env();
    info!(?config, "Loaded configuration");

    // Each worker gets a fresh id; it stamps committed event records so this
    // worker's own tailer does not redeliver them.
    let worker_id = format!("worker-{}", uuid::Uuid::new_v4().simple());
    info!(worker = %worker_id, "Worker identity assigned");

    // -----------------------------------------------------------------------
    // 3. Open durable state
    // -----------------------------------------------------------------------
    let database = Database::open_at(&config.db_path())?;
    let segments = SegmentStore::new(config.segments_dir(), config.segment_max_bytes)?;
    let event_log = EventLog::open(config.event_log_path())?;
    let archive = Arc::new(ArchiveStore::new(config.archive_dir())?);

    let message_store = MessageStore::new(
        database,
        segments,
        event_log,
        config.recall_window_secs,
        Some(worker_id.clone()),
    );
    let shared = SharedStore::new(message_store);

    // Separate read handle onto the same log file for the tailer.
    let tail_log = Arc::new(EventLog::open(config.event_log_path())?);

    // -----------------------------------------------------------------------
    // 4. Wire up the live-delivery plumbing
    // -----------------------------------------------------------------------
    let registry = Arc::new(ConnectionRegistry::new());
    let router = FanoutRouter::new(registry.clone());
    let presence = Arc::new(PresenceTracker::new(
        registry.clone(),
        config.presence_path(),
    ));
    let provider = Arc::new(StoreIdentityProvider::new(shared.clone()));

    let ctx = SessionContext {
        registry,
        router: router.clone(),
        presence: presence.clone(),
        provider,
        store: shared.clone(),
        auth_grace: std::time::Duration::from_secs(config.auth_grace_secs),
    };

    // -----------------------------------------------------------------------
    // 5. Spawn background tasks
    // -----------------------------------------------------------------------

    // Event-log tailer: cross-process delivery.
    let tailer = LogTailer::new(tail_log, router.clone(), worker_id)?;
    tokio::spawn(tailer.run(config.tail_interval_ms));

    // Periodic presence snapshot + broadcast.
    let presence_task = presence.clone();
    let presence_router = router.clone();
    let presence_interval = config.presence_interval_secs;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(presence_interval));
        loop {
            interval.tick().await;
            let online = presence_task.refresh().await;
            presence_router
                .broadcast(palaver_shared::ServerFrame::Presence { online })
                .await;
        }
    });

    // Hourly archival compaction of closed segments.
    let compact_store = shared.clone();
    let compact_interval = config.compact_interval_secs;
    let segment_retention = config.segment_retention_days;
    let archive_retention = config.archive_retention_days;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(compact_interval));
        loop {
            interval.tick().await;
            let store = compact_store.clone();
            let archive = archive.clone();
            let result = tokio::task::spawn_blocking(move || {
                let today = chrono::Utc::now().date_naive();
                store.blocking(|s| {
                    let archived = archive.compact(s.segments(), segment_retention, today)?;
                    let pruned = archive.prune(archive_retention, today)?;
                    Ok::<_, palaver_store::StoreError>((archived.len(), pruned))
                })
            })
            .await;
            match result {
                Ok(Ok((archived, pruned))) => {
                    if archived > 0 || pruned > 0 {
                        info!(archived, pruned, "compaction pass finished");
                    }
                }
                Ok(Err(e)) => tracing::warn!(error = %e, "compaction pass failed"),
                Err(e) => tracing::error!(error = %e, "compaction task panicked"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 6. Run the WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let state = AppState { ctx };
    tokio::select! {
        result = ws::serve(state, config.bind_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
